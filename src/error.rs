//! Error types for the project scanner

use std::path::PathBuf;
use thiserror::Error;

/// Error kinds that can occur while scanning or acting on projects
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanErrorKind {
    /// Permission denied when accessing a file or directory
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// I/O error during file operations
    IoError,
    /// Cache database operation failed
    DatabaseError,
    /// Invalid path encoding or shape
    InvalidPath,
    /// Operation was cancelled by the caller
    Cancelled,
    /// Settings file could not be read or written
    ConfigError,
    /// Operation not available on this platform
    Unsupported,
    /// Operation refused to protect the caller (root, home, existing target)
    Refused,
}

/// Represents an error that occurred during scanning or a file action
#[derive(Debug, Error)]
#[error("{kind:?}: {message} (path: {path:?})")]
pub struct ScanError {
    /// The kind of error
    pub kind: ScanErrorKind,
    /// The path where the error occurred
    pub path: Option<PathBuf>,
    /// Human-readable error message
    pub message: String,
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, ScanError>;

impl ScanError {
    /// Create a new scan error
    pub fn new(kind: ScanErrorKind, path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self {
            kind,
            path,
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(path: PathBuf) -> Self {
        Self::new(
            ScanErrorKind::NotFound,
            Some(path.clone()),
            format!("Not found: {:?}", path),
        )
    }

    /// Create an I/O error
    pub fn io_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::IoError, path, message)
    }

    /// Create a database error
    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::DatabaseError, None, message)
    }

    /// Create a config error
    pub fn config_error(path: Option<PathBuf>, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::ConfigError, path, message)
    }

    /// Create a refused-operation error
    pub fn refused(path: PathBuf, message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Refused, Some(path), message)
    }

    /// Create an unsupported-platform error
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ScanErrorKind::Unsupported, None, message)
    }

    /// Create a cancellation error
    pub fn cancelled() -> Self {
        Self::new(ScanErrorKind::Cancelled, None, "Operation cancelled")
    }

    /// Attach a path to an error that was built without one
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        if self.path.is_none() {
            self.path = Some(path.into());
        }
        self
    }

    /// Map an I/O error at a known path to the matching kind
    pub fn from_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ScanError::from(err).with_path(path)
    }
}

impl From<std::io::Error> for ScanError {
    fn from(err: std::io::Error) -> Self {
        let kind = match err.kind() {
            std::io::ErrorKind::PermissionDenied => ScanErrorKind::PermissionDenied,
            std::io::ErrorKind::NotFound => ScanErrorKind::NotFound,
            _ => ScanErrorKind::IoError,
        };
        Self::new(kind, None, err.to_string())
    }
}

impl From<rusqlite::Error> for ScanError {
    fn from(err: rusqlite::Error) -> Self {
        Self::database_error(err.to_string())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        Self::config_error(None, err.to_string())
    }
}
