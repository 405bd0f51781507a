//! Error taxonomy for pipeline runs.
//!
//! Every run terminates in exactly one of three ways: success with a result,
//! `Cancelled`, or a single error from this enum. Stages never swallow errors
//! to produce partial results.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Boxed error type carried by caller-supplied functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Terminal error for a pipeline or adapter run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed parameters, rejected before any I/O or iteration begins.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Cooperative cancellation was observed. Not a fault.
    #[error("cancelled")]
    Cancelled,

    /// A caller-supplied transform/filter/reduce function failed.
    /// Always fatal to the run, never retried.
    #[error("user function failed: {source}")]
    UserFunction {
        #[source]
        source: BoxError,
    },

    /// Retryable I/O condition (resource busy, timed out).
    #[error("transient i/o failure: {source}")]
    TransientIo {
        #[source]
        source: io::Error,
    },

    /// Non-retryable I/O failure, surfaced immediately.
    #[error("i/o failure: {source}")]
    PermanentIo {
        #[source]
        source: io::Error,
    },

    /// File path outside the allowed root set. Raised before any file handle
    /// is opened, never retried.
    #[error("path `{}` is outside the allowed roots", path.display())]
    PathSecurity { path: PathBuf },
}

impl PipelineError {
    /// Build an `InvalidArgument` error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Wrap a caller-supplied function's error.
    pub fn user(source: impl Into<BoxError>) -> Self {
        Self::UserFunction {
            source: source.into(),
        }
    }

    /// Classify an I/O error as transient or permanent.
    pub fn from_io(source: io::Error) -> Self {
        if is_transient_kind(source.kind()) {
            Self::TransientIo { source }
        } else {
            Self::PermanentIo { source }
        }
    }

    /// True for the cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// True for errors the retry combinator may attempt again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
    }
}

impl From<io::Error> for PipelineError {
    fn from(source: io::Error) -> Self {
        Self::from_io(source)
    }
}

fn is_transient_kind(kind: io::ErrorKind) -> bool {
    matches!(
        kind,
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Classify an error escaping a caller-supplied function.
///
/// Transient I/O conditions keep their retryable classification so the
/// bounded-parallel stage can back off and retry; anything else is a fatal
/// user-function failure.
pub fn classify_user_error(err: BoxError) -> PipelineError {
    match err.downcast::<io::Error>() {
        Ok(io_err) => PipelineError::from_io(*io_err),
        Err(other) => PipelineError::UserFunction { source: other },
    }
}
