//! The error kinds every library-level operation in the engine reports
//! through. The worker (see `thread::audio_thread`) never aborts on a
//! recoverable error: it removes the offending stream or device from its
//! list, or requests a reset, and keeps running.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArg(String),

    #[error("allocation failed: {0}")]
    NoMem(String),

    #[error("busy: {0}")]
    Busy(String),

    #[error("device I/O error: {0}")]
    IoError(String),

    #[error("xrun: {0}")]
    Xrun(String),

    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl EngineError {
    /// Whether the worker should drop the offending device from its list
    /// rather than merely logging and continuing.
    pub fn is_fatal_to_device(&self) -> bool {
        matches!(self, EngineError::IoError(_) | EngineError::Xrun(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
