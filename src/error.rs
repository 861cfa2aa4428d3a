//! Error types for the hosts engine.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// File operation that produced an I/O error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOp {
    Stat,
    Read,
    Write,
}

impl std::fmt::Display for FileOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOp::Stat => write!(f, "stat"),
            FileOp::Read => write!(f, "read"),
            FileOp::Write => write!(f, "write"),
        }
    }
}

/// Errors from queue mutation and reconciliation cycles.
///
/// Cloneable so a single cycle failure can be delivered to every
/// observer: the event channel, flush callers, and the log.
#[derive(Error, Debug, Clone)]
pub enum HostsError {
    #[error("Invalid argument: {reason}")]
    InvalidArgument { reason: String },

    #[error("Failed to {op} {path}: {message}")]
    Io {
        op: FileOp,
        path: PathBuf,
        kind: io::ErrorKind,
        message: String,
    },

    #[error("Engine closed")]
    Closed,
}

impl HostsError {
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        HostsError::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Capture an `io::Error` with the operation and path it came from.
    /// `io::Error` itself is not `Clone`, so kind and message are kept.
    pub fn io(op: FileOp, path: impl Into<PathBuf>, err: &io::Error) -> Self {
        HostsError::Io {
            op,
            path: path.into(),
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

pub type HostsResult<T> = Result<T, HostsError>;
