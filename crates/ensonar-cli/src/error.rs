//! Error types for the enso CLI.

use std::path::PathBuf;
use std::process::ExitCode;
use thiserror::Error;

/// Result type alias for CLI operations.
pub(crate) type Result<T> = std::result::Result<T, CliError>;

/// CLI error types, each with a distinct exit code.
#[derive(Error, Debug)]
pub(crate) enum CliError {
    /// File not found
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// Invalid weights format
    #[error("Invalid weights file: {0}")]
    InvalidFormat(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Video decoding failed
    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other library error
    #[error("{0}")]
    Ensonar(String),
}

impl CliError {
    /// Exit code for this error.
    pub(crate) fn exit_code(&self) -> ExitCode {
        match self {
            Self::FileNotFound(_) => ExitCode::from(3),
            Self::InvalidFormat(_) => ExitCode::from(4),
            Self::InvalidConfig(_) => ExitCode::from(5),
            Self::DecodeFailed(_) => ExitCode::from(6),
            Self::Io(_) => ExitCode::from(7),
            Self::Ensonar(_) => ExitCode::from(1),
        }
    }
}

impl From<ensonar::EnsonarError> for CliError {
    fn from(e: ensonar::EnsonarError) -> Self {
        use ensonar::EnsonarError;
        match e {
            EnsonarError::InvalidHyperparameter { .. } => Self::InvalidConfig(e.to_string()),
            EnsonarError::FormatError { .. } | EnsonarError::MissingTensor { .. } => {
                Self::InvalidFormat(e.to_string())
            }
            EnsonarError::Decode(msg) => Self::DecodeFailed(msg),
            EnsonarError::Io(io) => Self::Io(io),
            other => Self::Ensonar(other.to_string()),
        }
    }
}
