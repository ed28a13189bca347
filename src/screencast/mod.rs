//! Screen recording functionality
//!
//! The capture state machine, its shared state register, and the loop
//! that drives it in real time.

pub mod job;
pub mod recorder;
pub mod scheduler;
pub mod state;

pub use job::{Progress, RecordingJob};
pub use recorder::Recorder;
pub use scheduler::{CaptureScheduler, Clock, SINGLE_STEP_DELAY, SystemClock, Tick};
pub use state::{Controller, RecordingState, StateFlags};
