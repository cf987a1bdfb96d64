//! Object store client trait definition.

use crate::error::StoreResult;
use async_trait::async_trait;
use bytes::Bytes;

/// A conditional read of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetObject {
    /// Bucket holding the object.
    pub bucket: String,
    /// Key of the object.
    pub key: String,
    /// Fail with `NotModified` when the object's fingerprint equals this.
    pub if_none_match: Option<String>,
    /// Fail with `PreconditionFailed` unless the object's fingerprint equals this.
    pub if_match: Option<String>,
}

impl GetObject {
    /// Creates an unconditional read.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            if_none_match: None,
            if_match: None,
        }
    }

    /// Sets the `If-None-Match` fingerprint.
    #[must_use]
    pub fn if_none_match(mut self, fingerprint: Option<String>) -> Self {
        self.if_none_match = fingerprint;
        self
    }

    /// Sets the `If-Match` fingerprint.
    #[must_use]
    pub fn if_match(mut self, fingerprint: impl Into<String>) -> Self {
        self.if_match = Some(fingerprint.into());
        self
    }
}

/// An object body together with the fingerprint the store reported for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object body.
    pub body: Bytes,
    /// Store-reported fingerprint (ETag).
    pub fingerprint: String,
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutOutcome {
    /// Store-reported fingerprint (ETag) of the written object.
    pub fingerprint: String,
}

/// A remote blob service with S3 semantics.
///
/// Clients are **opaque byte stores**. s3lite builds its lock and sync
/// protocol on top of exactly these three calls.
///
/// # Invariants
///
/// - `put_object` reports the fingerprint of the body it stored
/// - `get_object` honours `if_none_match` and `if_match`
/// - Missing objects are reported as [`crate::StoreError::NotFound`]
#[async_trait]
pub trait ObjectStoreClient: Send + Sync {
    /// Reads an object.
    ///
    /// # Errors
    ///
    /// Returns `NotFound`, `NotModified` or `PreconditionFailed` for the
    /// corresponding conditions and `Transport` for anything else.
    async fn get_object(&self, request: GetObject) -> StoreResult<StoredObject>;

    /// Writes an object, replacing any previous body.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the upload fails.
    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> StoreResult<PutOutcome>;

    /// Deletes an object. Deleting a missing object succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the request fails.
    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()>;
}
