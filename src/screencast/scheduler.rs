//! Frame pacing and the capture state machine
//!
//! [`CaptureScheduler::tick`] performs at most one capture and returns how
//! long the caller should wait before the next tick. It never sleeps, so
//! whoever drives it can react to pause and stop requests between frames.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::job::{Progress, RecordingJob};
use super::state::{RecordingState, StateFlags};
use crate::buffer::PixelBuffer;
use crate::capture::FrameSource;
use crate::color::ColorLayout;
use crate::cursor::{CursorOverlay, PointerSource};
use crate::error::{CaptureError, Result};
use crate::sink::{OutputMode, SinkFormat};

/// Delay after a single-stepped frame, long enough for a level meter to flash.
pub const SINGLE_STEP_DELAY: Duration = Duration::from_millis(50);

const PROGRESS_LOG_FRAMES: u64 = 60;

/// Source of "now" for frame pacing.
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// What the caller should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Tick again after this long (zero: immediately).
    Continue(Duration),
    /// Wait for the pause to be lifted, then tick again.
    Paused,
    /// The session is over.
    Idle,
}

/// Time left in the frame interval after `worked`, or `None` when the
/// deadline has already passed. Work is counted as at least 1 ms.
pub fn remaining(interval: Duration, worked: Duration) -> Option<Duration> {
    let worked = worked.max(Duration::from_millis(1));
    interval.checked_sub(worked).filter(|d| !d.is_zero())
}

pub struct CaptureScheduler<C: Clock = SystemClock> {
    state: Arc<RecordingState>,
    job: RecordingJob,
    source: Box<dyn FrameSource>,
    overlay: CursorOverlay,
    pointer: Option<Box<dyn PointerSource>>,
    clock: C,
    progress: Arc<Progress>,
    layout: ColorLayout,
    buffer: Option<PixelBuffer>,
    target_open: bool,
    run_started: Option<Instant>,
    run_frames: u64,
    /// Set by a fatal error; the register must never return to READY.
    fatal: bool,
}

impl CaptureScheduler<SystemClock> {
    pub fn new(
        state: Arc<RecordingState>,
        job: RecordingJob,
        source: Box<dyn FrameSource>,
        overlay: CursorOverlay,
        pointer: Option<Box<dyn PointerSource>>,
    ) -> Self {
        Self::with_clock(state, job, source, overlay, pointer, SystemClock)
    }
}

impl<C: Clock> CaptureScheduler<C> {
    pub fn with_clock(
        state: Arc<RecordingState>,
        job: RecordingJob,
        source: Box<dyn FrameSource>,
        overlay: CursorOverlay,
        pointer: Option<Box<dyn PointerSource>>,
        clock: C,
    ) -> Self {
        let layout = source.geometry().color_layout();
        let progress = Arc::new(Progress::default());
        progress.set_position(job.frame_index, job.segment_index);
        Self {
            state,
            job,
            source,
            overlay,
            pointer,
            clock,
            progress,
            layout,
            buffer: None,
            target_open: false,
            run_started: None,
            run_frames: 0,
            fatal: false,
        }
    }

    pub fn job(&self) -> &RecordingJob {
        &self.job
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    pub fn state(&self) -> &Arc<RecordingState> {
        &self.state
    }

    /// Run one step of the state machine.
    pub fn tick(&mut self) -> Result<Tick> {
        if self.fatal {
            return Ok(Tick::Idle);
        }
        let flags = self.state.snapshot();

        if !flags.contains(StateFlags::RECORDING) {
            if flags.contains(StateFlags::READY) {
                return Ok(Tick::Idle);
            }
            return Ok(self.cleanup());
        }
        if flags.is_held() {
            return Ok(Tick::Paused);
        }
        if self.job.budget_reached() {
            log::info!(
                "Segment {} reached its budget of {} frames",
                self.job.segment_index,
                self.job.budget
            );
            if self.job.auto_continue {
                self.state.merge(StateFlags::AUTO_CONTINUE);
            }
            return Ok(self.cleanup());
        }

        let started = self.clock.now();
        let format = SinkFormat {
            geometry: self.source.geometry(),
            interval_ms: self.job.interval_ms,
        };
        let single_image = self.job.sink.mode() == OutputMode::SingleImage;

        if single_image {
            self.open_target(self.job.frame_target(), &format)?;
        }
        if flags.contains(StateFlags::STARTING) {
            self.start_run(&format, single_image)?;
        } else {
            self.capture_frame()?;
        }
        if single_image {
            let frame = self.job.frame_index;
            if let Err(e) = self.close_target() {
                return Err(self.fail(CaptureError::sink_write(frame, e)));
            }
        }

        let measured = self.clock.now();
        let worked = measured.saturating_duration_since(started);
        let interval = Duration::from_millis(self.job.interval_ms);
        let mut delay = match remaining(interval, worked) {
            Some(left) => {
                left.saturating_sub(self.clock.now().saturating_duration_since(measured))
            }
            None => {
                log::warn!(
                    "Missed frame deadline: frame {} took {} ms of a {} ms interval",
                    self.job.frame_index,
                    worked.as_millis(),
                    self.job.interval_ms
                );
                self.progress.record_missed();
                Duration::ZERO
            }
        };

        self.job.frame_index += self.job.step;
        if flags.contains(StateFlags::SINGLE_STEP) {
            self.state.remove(StateFlags::SINGLE_STEP);
            delay = SINGLE_STEP_DELAY;
        }
        self.progress
            .set_position(self.job.frame_index, self.job.segment_index);

        Ok(Tick::Continue(delay))
    }

    /// First frame of a run or segment.
    fn start_run(&mut self, format: &SinkFormat, single_image: bool) -> Result<()> {
        self.layout = format.geometry.color_layout();
        self.overlay.prepare(&self.layout);
        self.job.color_table = self
            .source
            .palette()
            .and_then(|palette| self.job.sink.color_table(&palette));
        self.run_started = Some(self.clock.now());
        self.run_frames = 0;

        if !single_image {
            self.open_target(self.job.segment_target(), format)?;
        }

        let mut buffer = match self.source.create() {
            Ok(buffer) => buffer,
            Err(e) => return Err(self.fail(e)),
        };
        log::debug!("Frame buffer ready: {:?}", buffer);

        self.composite(&mut buffer);
        let written = self.write(&buffer);
        self.buffer = Some(buffer);
        if let Err(e) = written {
            return Err(self.fail(e));
        }

        self.state.remove(StateFlags::STARTING);
        Ok(())
    }

    fn capture_frame(&mut self) -> Result<()> {
        let Some(mut buffer) = self.buffer.take() else {
            log::warn!("No frame buffer for frame {}, skipping", self.job.frame_index);
            self.progress.record_dropped();
            return Ok(());
        };

        let written = if self.source.refresh(&mut buffer) {
            self.composite(&mut buffer);
            self.write(&buffer)
        } else {
            log::warn!("Dropped frame {}: no image from display", self.job.frame_index);
            self.progress.record_dropped();
            Ok(())
        };

        self.buffer = Some(buffer);
        written.map_err(|e| self.fail(e))
    }

    fn composite(&mut self, buffer: &mut PixelBuffer) {
        if !self.overlay.is_enabled() {
            return;
        }
        let Some(pointer) = self.pointer.as_mut() else {
            return;
        };
        match pointer.locate(self.overlay.wants_image()) {
            Ok(snapshot) => {
                self.overlay
                    .composite(buffer, &self.layout, &self.source.area(), &snapshot);
            }
            Err(e) => log::warn!("Frame {} without pointer: {}", self.job.frame_index, e),
        }
    }

    fn write(&mut self, buffer: &PixelBuffer) -> Result<()> {
        let frame = self.job.frame_index;
        self.job
            .sink
            .write(buffer, &self.layout, self.job.color_table.as_ref())
            .map_err(|e| CaptureError::sink_write(frame, e))?;

        self.progress.record_captured();
        self.run_frames += 1;
        if self.run_frames % PROGRESS_LOG_FRAMES == 0 {
            if let Some(started) = self.run_started {
                let secs = self.clock.now().saturating_duration_since(started).as_secs_f64();
                log::info!(
                    "Recording: {} frames captured ({:.1} fps)",
                    self.run_frames,
                    self.run_frames as f64 / secs.max(0.001)
                );
            }
        }
        Ok(())
    }

    fn open_target(&mut self, target: PathBuf, format: &SinkFormat) -> Result<()> {
        if let Err(e) = self.job.sink.open(&target, format) {
            return Err(self.fail(CaptureError::output_open(target, e)));
        }
        self.target_open = true;
        Ok(())
    }

    fn close_target(&mut self) -> anyhow::Result<()> {
        if !std::mem::take(&mut self.target_open) {
            return Ok(());
        }
        self.job.sink.close()
    }

    /// Release the buffer and output, then either roll over to a new
    /// segment or go idle.
    fn cleanup(&mut self) -> Tick {
        self.buffer = None;
        let prior = self.state.merge_and_remove(
            StateFlags::STOPPED,
            StateFlags::RECORDING | StateFlags::STARTING | StateFlags::SINGLE_STEP,
        );
        if let Err(e) = self.close_target() {
            log::error!("Failed to finish output: {:#}", e);
            self.job.last_error = Some(format!("{:#}", e));
        }
        self.job.sink.clean();

        if prior.contains(StateFlags::AUTO_CONTINUE) {
            self.job.next_segment();
            self.progress
                .set_position(self.job.frame_index, self.job.segment_index);
            log::info!("Continuing with segment {}", self.job.segment_index);
            self.state.keep_and_merge(
                StateFlags::PAUSED,
                StateFlags::RECORDING | StateFlags::STARTING,
            );
            return Tick::Continue(Duration::ZERO);
        }

        log::info!(
            "Recording stopped: {} frames captured, {} dropped, {} deadlines missed",
            self.progress.captured(),
            self.progress.dropped(),
            self.progress.missed()
        );
        self.job.rewind();
        self.progress
            .set_position(self.job.frame_index, self.job.segment_index);
        self.state
            .merge_and_remove(StateFlags::READY, StateFlags::PAUSED);
        Tick::Idle
    }

    /// Stop the session because of `err` and hand it back for returning.
    fn fail(&mut self, err: CaptureError) -> CaptureError {
        log::error!("Recording failed: {}", err);
        self.job.last_error = Some(err.to_string());
        self.buffer = None;
        self.state.merge_and_remove(
            StateFlags::STOPPED,
            StateFlags::RECORDING
                | StateFlags::STARTING
                | StateFlags::SINGLE_STEP
                | StateFlags::AUTO_CONTINUE,
        );
        if let Err(e) = self.close_target() {
            log::warn!("Closing output after failure: {:#}", e);
        }
        self.job.sink.clean();

        if err.is_fatal() {
            self.fatal = true;
        } else {
            self.job.rewind();
            self.state
                .merge_and_remove(StateFlags::READY, StateFlags::PAUSED);
        }
        err
    }
}
