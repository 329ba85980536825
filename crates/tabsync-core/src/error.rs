//! Error types and result aliases for tabsync.
//!
//! Remote failures carry an [`ErrorClass`] decided at the client boundary so the
//! retry wrapper never has to inspect message text.

use std::fmt;

/// The result type used throughout tabsync.
pub type Result<T> = std::result::Result<T, Error>;

/// Classification of a remote failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Rate limiting, server errors and timeouts. Worth retrying.
    Transient,
    /// Anything else. Retrying will not help.
    Permanent,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transient => f.write_str("transient"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Errors that can occur in tabsync operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A call against a remote tabular store or source-of-truth failed.
    #[error("remote error ({class}): {message}")]
    Remote {
        /// Whether the failure is worth retrying.
        class: ErrorClass,
        /// Description of the failure.
        message: String,
    },

    /// A property store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },

    /// A key, sheet or table was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A precondition for the operation was not met.
    #[error("precondition failed: {message}")]
    PreconditionFailed {
        /// Description of the failed precondition.
        message: String,
    },

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a transient remote error.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Remote {
            class: ErrorClass::Transient,
            message: message.into(),
        }
    }

    /// Creates a permanent remote error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Remote {
            class: ErrorClass::Permanent,
            message: message.into(),
        }
    }

    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Returns true if retrying the failed call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Remote {
                class: ErrorClass::Transient,
                ..
            }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn remote_error_display_includes_class() {
        let err = Error::transient("429 too many requests");
        assert!(err.is_transient());
        assert_eq!(
            err.to_string(),
            "remote error (transient): 429 too many requests"
        );

        let err = Error::permanent("404 not found");
        assert!(!err.is_transient());
    }

    #[test]
    fn storage_error_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = Error::storage_with_source("failed to read property", source);
        assert!(err.to_string().contains("storage error"));
        assert!(StdError::source(&err).is_some());
    }
}
