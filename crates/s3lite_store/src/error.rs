//! Error types for object store operations.

use thiserror::Error;

/// Result type for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during object store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The object does not exist.
    #[error("object not found: {bucket}/{key}")]
    NotFound {
        /// Bucket that was searched.
        bucket: String,
        /// Key that was not found.
        key: String,
    },

    /// The object still matches the `If-None-Match` fingerprint.
    #[error("object not modified: {bucket}/{key}")]
    NotModified {
        /// Bucket of the object.
        bucket: String,
        /// Key of the object.
        key: String,
    },

    /// The object no longer matches the `If-Match` fingerprint.
    #[error("precondition failed for {bucket}/{key}")]
    PreconditionFailed {
        /// Bucket of the object.
        bucket: String,
        /// Key of the object.
        key: String,
    },

    /// Any other transport or service failure.
    #[error("object store error: {message}")]
    Transport {
        /// Error message.
        message: String,
    },
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotFound {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Creates a not-modified error.
    pub fn not_modified(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::NotModified {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Creates a precondition-failed error.
    pub fn precondition_failed(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Returns true if the object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Returns true if a conditional read found the object unchanged.
    pub fn is_not_modified(&self) -> bool {
        matches!(self, StoreError::NotModified { .. })
    }
}
