//! Error types for carton_core.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using carton_core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while packaging, reconciling or restoring.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid packaging or restore configuration.
    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    /// I/O error occurred during file operations.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// I/O error tied to a specific path.
    #[error("I/O error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A raw manifest row has fewer fields than required.
    #[error("Malformed manifest row {line}: expected at least 5 fields, got {fields}")]
    ManifestFormat { line: usize, fields: usize },

    /// The trailing JSON detail of a manifest row could not be decoded.
    #[error("Failed to parse manifest detail {fragment:?}: {reason}")]
    ManifestParse { fragment: String, reason: String },

    /// A checksum could not be computed.
    #[error("Checksum failed for {path}: {reason}")]
    Checksum { path: PathBuf, reason: String },

    /// Archive slice is corrupted, truncated or cannot be reassembled.
    #[error("Invalid archive at {path}: {reason}")]
    Archive { path: PathBuf, reason: String },

    /// JSON encoding or decoding failed.
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    /// The remote catalog answered with a non-success envelope.
    #[error("Remote catalog error: {message}")]
    Remote { message: String },
}

impl Error {
    /// Create a Configuration error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Error::Configuration {
            reason: reason.into(),
        }
    }

    /// Create an IoAt error.
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Create a ManifestFormat error.
    pub fn manifest_format(line: usize, fields: usize) -> Self {
        Error::ManifestFormat { line, fields }
    }

    /// Create a ManifestParse error.
    pub fn manifest_parse(fragment: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::ManifestParse {
            fragment: fragment.into(),
            reason: reason.into(),
        }
    }

    /// Create a Checksum error.
    pub fn checksum(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Checksum {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create an Archive error.
    pub fn archive(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Archive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a Remote error.
    pub fn remote(message: impl Into<String>) -> Self {
        Error::Remote {
            message: message.into(),
        }
    }
}

// Additional From implementations for external error types

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::Io { source: err.error }
    }
}

impl From<ignore::Error> for Error {
    fn from(err: ignore::Error) -> Self {
        // ignore::Error can wrap an io::Error or be a path error
        match err.io_error() {
            Some(io_err) => Error::Io {
                source: std::io::Error::new(io_err.kind(), io_err.to_string()),
            },
            None => Error::Io {
                source: std::io::Error::other(err.to_string()),
            },
        }
    }
}

impl From<rayon::ThreadPoolBuildError> for Error {
    fn from(err: rayon::ThreadPoolBuildError) -> Self {
        Error::configuration(format!("cannot build worker pool: {}", err))
    }
}
