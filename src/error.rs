//! Error types shared by the codec, the file boundaries and the service adapters.

use std::path::PathBuf;

/// Errors raised below the stage layer.
#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    /// Malformed timestamp string or number.
    #[error("Invalid timestamp '{value}': {reason}")]
    Format { value: String, reason: &'static str },

    /// Failed to read an input file.
    #[error("Failed to read file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write an output file.
    #[error("Failed to write file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A file did not match the shape its stage expects.
    #[error("Unexpected JSON shape in '{path}': {source}")]
    Schema {
        path: PathBuf,
        source: serde_json::Error,
    },

    /// A model backend answered with something unusable.
    #[error("{service} returned an unusable response: {message}")]
    ExternalService {
        service: &'static str,
        message: String,
    },
}

pub(crate) type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn format(value: impl Into<String>, reason: &'static str) -> Self {
        Self::Format {
            value: value.into(),
            reason,
        }
    }

    pub(crate) fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Read {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn schema(path: impl Into<PathBuf>, source: serde_json::Error) -> Self {
        Self::Schema {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn service(service: &'static str, message: impl Into<String>) -> Self {
        Self::ExternalService {
            service,
            message: message.into(),
        }
    }
}
