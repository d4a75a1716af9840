//! Error types surfaced by the core engine.

use thiserror::Error;

/// Everything that can go wrong while reading or writing an IFHD file.
///
/// Errors carry enough context to build the nested, indented diagnostics the
/// CLI driver prints (see `ifhd-cli`'s `error` module) without needing to
/// downcast.
#[derive(Debug, Error)]
pub enum IfhdError {
    /// Iteration past the last chunk, or a short read where all bytes were required.
    #[error("end of file")]
    EndOfFile,

    /// Magic mismatch, unsupported version, unsupported byte order, or truncated header.
    #[error("invalid file: {reason}")]
    InvalidFile { reason: String },

    /// Stream id outside range, negative timestamp, zero-size additional info, etc.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Seek position outside existing chunks, or extension index outside range.
    #[error("out of range: {reason}")]
    OutOfRange { reason: String },

    /// Extension identifier unknown, or stream id unknown.
    #[error("not found: {identifier}")]
    NotFound { identifier: String },

    /// Wraps the underlying OS error verbatim.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// `quit_history` called without history mode or twice; writes after close; reads after close.
    #[error("illegal state: {reason}")]
    IllegalState { reason: String },

    /// The async writer task captured an OS error; the first subsequent producer
    /// call surfaces it here.
    #[error("write thread failed{}", .os_error.map(|e| format!(" (os error {e})")).unwrap_or_default())]
    WriteThreadError { os_error: Option<i32> },
}

impl IfhdError {
    /// The OS error code behind this failure, if any.
    pub fn last_system_error(&self) -> Option<i32> {
        match self {
            IfhdError::Io(e) => e.raw_os_error(),
            IfhdError::WriteThreadError { os_error } => *os_error,
            _ => None,
        }
    }

    pub(crate) fn invalid_file(reason: impl Into<String>) -> Self {
        IfhdError::InvalidFile {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        IfhdError::InvalidArgument {
            reason: reason.into(),
        }
    }

    pub(crate) fn out_of_range(reason: impl Into<String>) -> Self {
        IfhdError::OutOfRange {
            reason: reason.into(),
        }
    }

    pub(crate) fn not_found(identifier: impl Into<String>) -> Self {
        IfhdError::NotFound {
            identifier: identifier.into(),
        }
    }

    pub(crate) fn illegal_state(reason: impl Into<String>) -> Self {
        IfhdError::IllegalState {
            reason: reason.into(),
        }
    }
}

/// Convenience alias used throughout the crate.
pub type IfhdResult<T> = Result<T, IfhdError>;
