//! Error types for kernel Fisher discriminant analysis.

use thiserror::Error;

use crate::linalg_backends::BackendError;

/// Errors surfaced by configuration, `fit` and `transform`.
#[derive(Debug, Error)]
pub enum KfdaError {
    /// Malformed input: bad shapes, mismatched lengths, non-finite values.
    #[error("invalid input: {0}")]
    Validation(String),

    /// The configuration cannot produce a model (unknown kernel, no usable
    /// discriminant direction, out-of-range parameters).
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// `transform` or a fitted accessor was used before a successful `fit`.
    #[error("model has not been fitted; call `fit` first")]
    Unfitted,

    /// A linear-algebra routine failed, or the kernel produced non-finite values.
    #[error("numerical failure: {message}")]
    Numerical {
        message: String,
        #[source]
        source: Option<BackendError>,
    },
}

impl KfdaError {
    pub(crate) fn numerical(message: impl Into<String>) -> Self {
        KfdaError::Numerical {
            message: message.into(),
            source: None,
        }
    }

    pub(crate) fn backend(message: impl Into<String>, source: BackendError) -> Self {
        KfdaError::Numerical {
            message: message.into(),
            source: Some(source),
        }
    }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, KfdaError>;
