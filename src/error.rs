//! Error types for the capture pipeline
//!
//! Every failure the scheduler can see is a [`CaptureError`]; its
//! [`Severity`] decides whether the process, the session, or only the
//! current frame is lost.

use std::path::PathBuf;

use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// How far a failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// No degraded mode exists; the recorder must shut down.
    Fatal,
    /// The session is stopped, a later `start()` may succeed.
    Session,
    /// Only the current frame is affected.
    Frame,
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("cannot connect to X display: {0}")]
    Connect(#[from] x11rb::errors::ConnectError),

    #[error("X11 connection failed: {0}")]
    Connection(#[from] x11rb::errors::ConnectionError),

    #[error("X11 request failed: {0}")]
    Reply(#[from] x11rb::errors::ReplyError),

    #[error("X11 request failed: {0}")]
    ReplyOrId(#[from] x11rb::errors::ReplyOrIdError),

    #[error("shared memory segment: {0}")]
    SharedMemory(String),

    #[error("frame acquisition failed: {0}")]
    Acquisition(String),

    #[error("unsupported pixel layout: {0}")]
    UnsupportedFormat(String),

    #[error("cannot open output {}: {source}", path.display())]
    OutputOpen {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("writing frame {frame} failed: {source}")]
    SinkWrite {
        frame: u64,
        #[source]
        source: BoxError,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("pointer position unavailable: {0}")]
    Pointer(String),

    #[error("frame {0} dropped")]
    FrameDropped(u64),
}

impl CaptureError {
    pub fn severity(&self) -> Severity {
        match self {
            CaptureError::SharedMemory(_) => Severity::Fatal,
            CaptureError::Pointer(_) | CaptureError::FrameDropped(_) => Severity::Frame,
            _ => Severity::Session,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.severity() == Severity::Fatal
    }

    pub(crate) fn output_open(path: impl Into<PathBuf>, err: anyhow::Error) -> Self {
        CaptureError::OutputOpen {
            path: path.into(),
            source: err.into(),
        }
    }

    pub(crate) fn sink_write(frame: u64, err: anyhow::Error) -> Self {
        CaptureError::SinkWrite {
            frame,
            source: err.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CaptureError>;
