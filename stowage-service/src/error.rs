use std::error::Error as StdError;

use serde::Serialize;
use stowage_types::{InvalidRangeError, OptionError, ParseError};
use thiserror::Error;

/// Coarse classification of a [`StorageError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The adapter could not be configured. Sticky for the lifetime of the adapter.
    Configuration,
    /// An argument was rejected before any backend call.
    Validation,
    /// The bucket or file does not exist.
    NotFound,
    /// The provider reported a failure.
    Backend,
    /// The provider cannot answer this question.
    Unsupported,
}

/// Errors that can occur in the storage service.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Invalid or incomplete configuration.
    #[error("{0}")]
    Config(String),

    /// An argument was rejected before any backend call.
    #[error("{0}")]
    Validation(String),

    /// The bucket or file does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The provider cannot perform the requested operation.
    #[error("{0}")]
    Unsupported(String),

    /// IO errors related to payload streaming or file operations.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other error stemming from one of the storage backends.
    #[error("{context}: {cause}")]
    Backend {
        /// What was attempted.
        context: String,
        /// The underlying error.
        #[source]
        cause: Box<dyn StdError + Send + Sync>,
    },
}

impl StorageError {
    /// Wraps a provider error with a description of the failed operation.
    pub fn backend<E>(context: impl Into<String>, cause: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync>>,
    {
        Self::Backend {
            context: context.into(),
            cause: cause.into(),
        }
    }

    /// Shorthand for a [`StorageError::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Shorthand for a [`StorageError::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Shorthand for a [`StorageError::NotFound`] error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Shorthand for a [`StorageError::Unsupported`] error.
    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::Unsupported(message.into())
    }

    /// The kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Configuration,
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Unsupported(_) => ErrorKind::Unsupported,
            Self::Io(err) if err.kind() == std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            Self::Io(_) | Self::Backend { .. } => ErrorKind::Backend,
        }
    }

    /// Returns `true` if this error reports a missing bucket or file.
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

impl From<ParseError> for StorageError {
    fn from(err: ParseError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<OptionError> for StorageError {
    fn from(err: OptionError) -> Self {
        Self::Config(err.to_string())
    }
}

impl From<InvalidRangeError> for StorageError {
    fn from(err: InvalidRangeError) -> Self {
        Self::Validation(err.to_string())
    }
}

/// Result type for all storage operations.
pub type StorageResult<T, E = StorageError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds() {
        assert_eq!(
            StorageError::config("missing region").kind(),
            ErrorKind::Configuration
        );
        assert_eq!(
            StorageError::from(InvalidRangeError { start: 3, end: 1 }).kind(),
            ErrorKind::Validation
        );

        let io = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(StorageError::from(io).is_not_found());

        let io = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert_eq!(StorageError::from(io).kind(), ErrorKind::Backend);
    }

    #[test]
    fn backend_message_includes_cause() {
        let err = StorageError::backend("failed to list buckets", "connection refused");
        assert_eq!(
            err.to_string(),
            "failed to list buckets: connection refused"
        );
        assert!(err.source().is_some());
    }
}
