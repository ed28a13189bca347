//! Per-session bookkeeping

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::color::ColorTable;
use crate::config::{OutputTemplate, RecorderConfig};
use crate::error::Result;
use crate::sink::FrameSink;

/// Counters the control side can read while the scheduler runs.
#[derive(Debug, Default)]
pub struct Progress {
    captured: AtomicU64,
    dropped: AtomicU64,
    missed: AtomicU64,
    frame_index: AtomicU64,
    segment_index: AtomicU64,
}

impl Progress {
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Frames that took longer than the frame interval.
    pub fn missed(&self) -> u64 {
        self.missed.load(Ordering::Relaxed)
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index.load(Ordering::Relaxed)
    }

    pub fn segment_index(&self) -> u64 {
        self.segment_index.load(Ordering::Relaxed)
    }

    pub(crate) fn record_captured(&self) -> u64 {
        self.captured.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_missed(&self) {
        self.missed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_position(&self, frame_index: u64, segment_index: u64) {
        self.frame_index.store(frame_index, Ordering::Relaxed);
        self.segment_index.store(segment_index, Ordering::Relaxed);
    }
}

/// The active session's settings and position.
pub struct RecordingJob {
    pub template: OutputTemplate,
    pub start_number: u64,
    pub frame_index: u64,
    pub segment_index: u64,
    /// Frames per segment, 0 = unbounded.
    pub budget: u64,
    pub step: u64,
    pub interval_ms: u64,
    pub auto_continue: bool,
    pub(crate) sink: Box<dyn FrameSink>,
    pub(crate) color_table: Option<ColorTable>,
    pub last_error: Option<String>,
}

impl RecordingJob {
    pub fn new(template: OutputTemplate, sink: Box<dyn FrameSink>) -> Self {
        Self {
            template,
            start_number: 0,
            frame_index: 0,
            segment_index: 0,
            budget: 0,
            step: 1,
            interval_ms: 100,
            auto_continue: false,
            sink,
            color_table: None,
            last_error: None,
        }
    }

    pub fn from_config(config: &RecorderConfig, sink: Box<dyn FrameSink>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            start_number: config.start_number,
            frame_index: config.start_number,
            budget: config.frame_budget(),
            step: config.step,
            interval_ms: config.interval_ms(),
            auto_continue: config.auto_continue,
            ..Self::new(config.output_template()?, sink)
        })
    }

    /// The next frame would fall outside the budget.
    pub fn budget_reached(&self) -> bool {
        self.budget > 0 && self.frame_index.saturating_sub(self.start_number) > self.budget - 1
    }

    /// Path for the current frame in single-image mode.
    pub fn frame_target(&self) -> PathBuf {
        self.template.expand(self.frame_index)
    }

    /// Path for the current segment in streaming mode.
    pub fn segment_target(&self) -> PathBuf {
        self.template.expand(self.segment_index)
    }

    /// Back to the first frame of a new segment.
    pub(crate) fn next_segment(&mut self) {
        self.segment_index += 1;
        self.frame_index = self.start_number;
    }

    pub(crate) fn rewind(&mut self) {
        self.frame_index = self.start_number;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::ImageSink;

    fn job(config: &RecorderConfig) -> RecordingJob {
        let sink = Box::new(ImageSink::new(crate::config::ImageFormat::Png, 90));
        RecordingJob::from_config(config, sink).unwrap()
    }

    #[test]
    fn test_budget_is_inclusive_of_start() {
        let config = RecorderConfig {
            output: "/tmp/f-%03d.png".into(),
            start_number: 10,
            max_frames: 3,
            ..Default::default()
        };
        let mut job = job(&config);
        let mut produced = Vec::new();
        while !job.budget_reached() {
            produced.push(job.frame_target());
            job.frame_index += job.step;
        }
        assert_eq!(
            produced,
            vec![
                PathBuf::from("/tmp/f-010.png"),
                PathBuf::from("/tmp/f-011.png"),
                PathBuf::from("/tmp/f-012.png"),
            ]
        );
    }

    #[test]
    fn test_unbounded_budget() {
        let config = RecorderConfig {
            output: "/tmp/f-%d.png".into(),
            ..Default::default()
        };
        let mut job = job(&config);
        job.frame_index = u64::MAX / 2;
        assert!(!job.budget_reached());
    }

    #[test]
    fn test_next_segment_resets_frame() {
        let config = RecorderConfig {
            output: "/tmp/f-%d.png".into(),
            start_number: 5,
            ..Default::default()
        };
        let mut job = job(&config);
        job.frame_index = 42;
        job.next_segment();
        assert_eq!((job.frame_index, job.segment_index), (5, 1));
        assert_eq!(job.segment_target(), PathBuf::from("/tmp/f-1.png"));
    }

    #[test]
    fn test_from_config_rejects_invalid() {
        let config = RecorderConfig {
            output: "/tmp/no-counter.png".into(),
            ..Default::default()
        };
        let sink = Box::new(ImageSink::new(crate::config::ImageFormat::Png, 90));
        assert!(RecordingJob::from_config(&config, sink).is_err());
    }

    #[test]
    fn test_progress_counters() {
        let progress = Progress::default();
        assert_eq!(progress.record_captured(), 1);
        assert_eq!(progress.record_captured(), 2);
        progress.record_dropped();
        progress.record_missed();
        progress.set_position(7, 2);
        assert_eq!(
            (progress.captured(), progress.dropped(), progress.missed()),
            (2, 1, 1)
        );
        assert_eq!((progress.frame_index(), progress.segment_index()), (7, 2));
    }
}
