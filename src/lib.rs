//! snapreel: frame-paced X11 screen recording
//!
//! Frames come from a [`capture::FrameSource`], get a pointer composited by
//! [`cursor::CursorOverlay`], and are handed to a [`sink::FrameSink`]. The
//! [`screencast::CaptureScheduler`] ties these together one tick at a time.

pub mod buffer;
pub mod capture;
pub mod color;
pub mod config;
pub mod cursor;
pub mod error;
pub mod screencast;
pub mod sink;

pub use error::{CaptureError, Severity};
