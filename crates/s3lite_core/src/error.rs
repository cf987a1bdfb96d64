//! Error types for s3lite core.

use s3lite_store::StoreError;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur in s3lite core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid configuration, detected when a database is opened.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// The database address could not be parsed.
    #[error("invalid database address: {address}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
    },

    /// The remote database changed between pull and push.
    #[error("remote database {key} was updated externally: expected {expected}, store reported {actual}")]
    RemoteDatabaseUpdated {
        /// Key of the database object.
        key: String,
        /// Fingerprint computed from the uploaded body.
        expected: String,
        /// Fingerprint reported by the store.
        actual: String,
    },

    /// Object store error.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Error reported by the local relational engine.
    #[error("engine error: {message}")]
    Engine {
        /// Description of the failure.
        message: String,
    },

    /// Statement parameters could not be interpreted.
    #[error("invalid parameters: {message}")]
    InvalidParameters {
        /// Description of the problem.
        message: String,
    },

    /// Lease content could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Local file I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A queued step never ran because an earlier step of its group failed.
    #[error("operation abandoned after an earlier step of its group failed")]
    OperationAbandoned,
}

impl CoreError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates an engine error.
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine {
            message: message.into(),
        }
    }

    /// Creates an invalid parameters error.
    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    /// Returns true if the remote database was updated by someone else.
    ///
    /// The executor retries whole requests that fail with this error.
    pub fn is_remote_updated(&self) -> bool {
        matches!(self, CoreError::RemoteDatabaseUpdated { .. })
    }

    /// Returns true if the underlying store reported a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::Store(e) if e.is_not_found())
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for CoreError {
    fn from(error: rusqlite::Error) -> Self {
        Self::engine(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_updated_classification() {
        let err = CoreError::RemoteDatabaseUpdated {
            key: "db.sqlite".into(),
            expected: "\"a\"".into(),
            actual: "\"b\"".into(),
        };
        assert!(err.is_remote_updated());
        assert!(!CoreError::engine("no such table").is_remote_updated());
        assert!(!CoreError::OperationAbandoned.is_remote_updated());
    }

    #[test]
    fn store_errors_convert() {
        let err: CoreError = StoreError::not_found("bucket", "db.sqlite").into();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("bucket/db.sqlite"));
    }

    #[test]
    fn error_display() {
        let err = CoreError::config("min_lock_lifetime exceeds max_lock_lifetime");
        assert_eq!(
            err.to_string(),
            "invalid configuration: min_lock_lifetime exceeds max_lock_lifetime"
        );
    }
}
