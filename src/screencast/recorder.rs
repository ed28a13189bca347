//! Main recording loop

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};

use super::job::{Progress, RecordingJob};
use super::scheduler::{CaptureScheduler, Clock, SystemClock, Tick};
use super::state::{Controller, RecordingState, StateFlags};
use crate::capture::{FrameSource, PlainSource, ShmSource, X11Display, X11Pointer};
use crate::config::RecorderConfig;
use crate::cursor::{CursorMode, CursorOverlay, PointerSource};
use crate::error::CaptureError;
use crate::sink;

/// Global flag for graceful shutdown on SIGTERM/SIGINT
static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Longest uninterrupted wait, so signals are noticed promptly
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Drives a [`CaptureScheduler`] in real time until it goes idle.
pub struct Recorder<C: Clock = SystemClock> {
    scheduler: CaptureScheduler<C>,
    controller: Controller,
    transitions: Receiver<StateFlags>,
}

impl Recorder<SystemClock> {
    /// Connect to the display and assemble source, pointer and sink
    pub fn from_config(config: &RecorderConfig) -> Result<Self> {
        config.validate()?;

        log::info!("Connecting to X display...");
        let display = X11Display::connect(config.display.as_deref(), config.area)
            .context("Failed to open the X display. Is DISPLAY set?")?;

        let source: Box<dyn FrameSource> = if config.use_shm {
            let shm = ShmSource::new(Arc::clone(&display))
                .context("Shared memory capture unavailable; run with --no-shm")?;
            log::info!("Capturing through MIT-SHM");
            Box::new(shm)
        } else {
            log::info!("Capturing through GetImage");
            Box::new(PlainSource::new(Arc::clone(&display)))
        };

        let overlay = CursorOverlay::new(config.cursor, display.mono_pixels());
        let pointer = (config.cursor != CursorMode::None)
            .then(|| Box::new(X11Pointer::new(Arc::clone(&display))) as Box<dyn PointerSource>);

        let sink = sink::open_for(config)?;
        let job = RecordingJob::from_config(config, sink)?;
        log::info!(
            "Frame interval {} ms, budget {}, step {}, auto-continue {}",
            job.interval_ms,
            if job.budget == 0 {
                "unbounded".to_string()
            } else {
                format!("{} frames", job.budget)
            },
            job.step,
            job.auto_continue
        );

        let state = Arc::new(RecordingState::new());
        Ok(Self::new(CaptureScheduler::new(
            state, job, source, overlay, pointer,
        )))
    }
}

impl<C: Clock> Recorder<C> {
    pub fn new(scheduler: CaptureScheduler<C>) -> Self {
        let controller = Controller::new(Arc::clone(scheduler.state()));
        let transitions = controller.subscribe();
        Self {
            scheduler,
            controller,
            transitions,
        }
    }

    pub fn controller(&self) -> Controller {
        self.controller.clone()
    }

    pub fn progress(&self) -> Arc<Progress> {
        self.scheduler.progress()
    }

    /// Tick until the session goes idle. Fatal and session errors end the
    /// loop and are returned.
    pub fn run(&mut self) -> std::result::Result<(), CaptureError> {
        setup_signal_handler();

        loop {
            if STOP_REQUESTED.swap(false, Ordering::Relaxed) {
                log::info!("Received stop signal");
                self.controller.stop();
            }

            match self.scheduler.tick()? {
                Tick::Continue(delay) => self.wait(delay),
                Tick::Paused => {
                    self.scheduler.state().wait_while_paused(POLL_INTERVAL);
                }
                Tick::Idle => break,
            }
        }

        Ok(())
    }

    /// Sleep for `delay`, returning early if the run is stopped or paused.
    fn wait(&self, delay: Duration) {
        // Queued transitions predate the tick that asked for this delay
        for _ in self.transitions.try_iter() {}

        let state = self.scheduler.state();
        let entered = state.snapshot();
        if !entered.contains(StateFlags::RECORDING) {
            return;
        }
        let held_before = entered.is_held();

        let deadline = Instant::now() + delay;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            match self.transitions.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                Ok(_) => {
                    let live = state.snapshot();
                    if !live.contains(StateFlags::RECORDING) || (live.is_held() && !held_before) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if STOP_REQUESTED.load(Ordering::Relaxed) {
                        return;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(deadline.saturating_duration_since(Instant::now()));
                    return;
                }
            }
        }
    }
}

/// Set up signal handler for SIGTERM and SIGINT
fn setup_signal_handler() {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| unsafe {
        let handler = stop_signal_handler as extern "C" fn(libc::c_int) as libc::sighandler_t;
        libc::signal(libc::SIGTERM, handler);
        libc::signal(libc::SIGINT, handler);
    });
}

/// Only touches the atomic flag, which is async-signal-safe
extern "C" fn stop_signal_handler(_: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::Relaxed);
}
