//! Error types for Ensonar operations.
//!
//! Provides rich error context for library consumers.

use std::fmt;

/// Main error type for Ensonar operations.
///
/// Covers tensor shape mismatches, invalid dream hyperparameters,
/// weights-file format problems, and the I/O and decoding failures of
/// the video and GIF boundaries.
///
/// # Examples
///
/// ```
/// use ensonar::error::EnsonarError;
///
/// let err = EnsonarError::DimensionMismatch {
///     expected: "3x32x112x112".to_string(),
///     actual: "3x16x112x112".to_string(),
/// };
/// assert!(err.to_string().contains("dimension mismatch"));
/// ```
#[derive(Debug)]
pub enum EnsonarError {
    /// Tensor or clip dimensions don't match what an operation requires.
    DimensionMismatch {
        /// Expected dimensions description
        expected: String,
        /// Actual dimensions found
        actual: String,
    },

    /// Invalid hyperparameter value provided.
    InvalidHyperparameter {
        /// Parameter name
        param: String,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// Invalid or corrupt weights-file format.
    FormatError {
        /// Error description
        message: String,
    },

    /// A tensor required by the network is absent from the weights file.
    MissingTensor {
        /// Canonical parameter name
        name: String,
    },

    /// Video decoding failed (ffmpeg/ffprobe missing, bad stream, ...).
    Decode(String),

    /// I/O error (file not found, permission denied, etc.).
    Io(std::io::Error),

    /// Generic error with string message.
    Other(String),
}

impl fmt::Display for EnsonarError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnsonarError::DimensionMismatch { expected, actual } => {
                write!(
                    f,
                    "Tensor dimension mismatch: expected {expected}, got {actual}"
                )
            }
            EnsonarError::InvalidHyperparameter {
                param,
                value,
                constraint,
            } => {
                write!(
                    f,
                    "Invalid hyperparameter: {param} = {value}, expected {constraint}"
                )
            }
            EnsonarError::FormatError { message } => {
                write!(f, "Invalid weights format: {message}")
            }
            EnsonarError::MissingTensor { name } => {
                write!(f, "Weights file is missing tensor: {name}")
            }
            EnsonarError::Decode(msg) => write!(f, "Video decode error: {msg}"),
            EnsonarError::Io(e) => write!(f, "I/O error: {e}"),
            EnsonarError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EnsonarError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EnsonarError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EnsonarError {
    fn from(err: std::io::Error) -> Self {
        EnsonarError::Io(err)
    }
}

impl From<&str> for EnsonarError {
    fn from(msg: &str) -> Self {
        EnsonarError::Other(msg.to_string())
    }
}

impl From<String> for EnsonarError {
    fn from(msg: String) -> Self {
        EnsonarError::Other(msg)
    }
}

impl EnsonarError {
    /// Create a dimension mismatch error with descriptive context.
    #[must_use]
    pub fn dimension_mismatch(context: &str, expected: &[usize], actual: &[usize]) -> Self {
        Self::DimensionMismatch {
            expected: format!("{context}={expected:?}"),
            actual: format!("{actual:?}"),
        }
    }

    /// Create an invalid hyperparameter error.
    #[must_use]
    pub fn invalid_hyperparameter(param: &str, value: impl fmt::Display, constraint: &str) -> Self {
        Self::InvalidHyperparameter {
            param: param.to_string(),
            value: value.to_string(),
            constraint: constraint.to_string(),
        }
    }

    /// Create a weights-format error.
    #[must_use]
    pub fn format(message: impl Into<String>) -> Self {
        Self::FormatError {
            message: message.into(),
        }
    }
}

/// Convenience type alias for Results.
pub type Result<T> = std::result::Result<T, EnsonarError>;
