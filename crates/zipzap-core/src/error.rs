//! Error types for zipzap-core

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Core error types for the zipzap library
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Archive failed structural validation
    #[error("Corrupt archive {path:?}: {reason}")]
    CorruptArchive { path: PathBuf, reason: String },

    /// A single entry could not be decoded
    #[error("Corrupt entry {entry:?}: {reason}")]
    CorruptEntry { entry: String, reason: String },

    /// Entry name resolves outside the destination directory
    #[error("Path traversal attempt detected: {0:?}")]
    PathTraversal(String),

    /// An existing output file could not be handled under the current policy
    #[error("Unresolved conflict at {path:?}: {reason}")]
    ConflictUnresolved { path: PathBuf, reason: String },

    /// Per-archive extraction timeout elapsed
    #[error("Extraction timed out after {0:?}")]
    Timeout(Duration),

    /// Unsupported archive format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Invalid file or directory path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration-related error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Progress file could not be read or written
    #[error("State error: {0}")]
    State(String),
}

impl Error {
    /// Classify this error for the task record
    pub fn kind(&self) -> FailureKind {
        match self {
            Error::Io(_) | Error::NotFound(_) | Error::State(_) => FailureKind::Io,
            Error::CorruptArchive { .. } => FailureKind::CorruptArchive,
            Error::CorruptEntry { .. } => FailureKind::CorruptEntry,
            Error::PathTraversal(_) | Error::InvalidPath(_) => FailureKind::PathTraversal,
            Error::ConflictUnresolved { .. } => FailureKind::ConflictUnresolved,
            Error::Timeout(_) => FailureKind::Timeout,
            Error::UnsupportedFormat(_) | Error::Config(_) => FailureKind::Unsupported,
        }
    }

    /// Whether another attempt could plausibly succeed without the archive changing
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::State(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<glob::PatternError> for Error {
    fn from(err: glob::PatternError) -> Self {
        Error::Config(format!("invalid exclude pattern: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure classification persisted with a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    CorruptArchive,
    CorruptEntry,
    PathTraversal,
    Io,
    ConflictUnresolved,
    Timeout,
    Unsupported,
}

impl FailureKind {
    /// Transient failures are retried up to `max_attempts`
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Io | FailureKind::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::CorruptArchive => "corrupt archive",
            FailureKind::CorruptEntry => "corrupt entry",
            FailureKind::PathTraversal => "path traversal",
            FailureKind::Io => "i/o error",
            FailureKind::ConflictUnresolved => "unresolved conflict",
            FailureKind::Timeout => "timeout",
            FailureKind::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// Last failure recorded on an [`ArchiveTask`](crate::task::ArchiveTask)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&Error> for TaskError {
    fn from(err: &Error) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Non-fatal problems met while walking the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    PermissionDenied,
    SymlinkLoop,
    Unreadable,
}

/// A warning produced by the scanner; the walk continues past it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanWarning {
    pub path: Option<PathBuf>,
    pub kind: WarningKind,
    pub message: String,
}

impl fmt::Display for ScanWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{:?}: {}", path, self.message),
            None => f.write_str(&self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::Io(io::Error::new(io::ErrorKind::Other, "disk")).is_retryable());
        assert!(Error::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(!Error::PathTraversal("../x".into()).is_retryable());
        assert!(!Error::CorruptArchive {
            path: PathBuf::from("a.zip"),
            reason: "truncated".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_task_error_from_error() {
        let err = Error::ConflictUnresolved {
            path: PathBuf::from("out.txt"),
            reason: "exists".into(),
        };
        let task_err = TaskError::from(&err);
        assert_eq!(task_err.kind, FailureKind::ConflictUnresolved);
        assert!(task_err.message.contains("out.txt"));
    }
}
