//! Amazon S3 client built on the `object_store` crate.

use crate::client::{GetObject, ObjectStoreClient, PutOutcome, StoredObject};
use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{GetOptions, ObjectStore, PutPayload};
use std::sync::Arc;

/// An [`ObjectStoreClient`] backed by any `object_store` implementation.
///
/// One adapter is bound to one bucket; requests naming another bucket are
/// rejected. Credentials are read from the standard `AWS_*` environment
/// variables when built with [`ObjectStoreAdapter::s3`].
pub struct ObjectStoreAdapter {
    bucket: String,
    store: Arc<dyn ObjectStore>,
}

impl ObjectStoreAdapter {
    /// Wraps an existing `object_store` instance serving `bucket`.
    pub fn new(bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            bucket: bucket.into(),
            store,
        }
    }

    /// Builds an Amazon S3 client for `bucket` in `region`.
    ///
    /// # Errors
    ///
    /// Returns `Transport` if the client cannot be configured.
    pub fn s3(bucket: &str, region: &str) -> StoreResult<Self> {
        let store = AmazonS3Builder::from_env()
            .with_bucket_name(bucket)
            .with_region(region)
            .build()
            .map_err(|e| StoreError::transport(e.to_string()))?;

        Ok(Self::new(bucket, Arc::new(store)))
    }

    fn check_bucket(&self, bucket: &str) -> StoreResult<()> {
        if bucket == self.bucket {
            Ok(())
        } else {
            Err(StoreError::transport(format!(
                "client is bound to bucket {}, not {bucket}",
                self.bucket
            )))
        }
    }

    fn map_error(bucket: &str, key: &str, error: object_store::Error) -> StoreError {
        match error {
            object_store::Error::NotFound { .. } => StoreError::not_found(bucket, key),
            object_store::Error::NotModified { .. } => StoreError::not_modified(bucket, key),
            object_store::Error::Precondition { .. } => {
                StoreError::precondition_failed(bucket, key)
            }
            other => StoreError::transport(other.to_string()),
        }
    }
}

impl std::fmt::Debug for ObjectStoreAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStoreAdapter")
            .field("bucket", &self.bucket)
            .field("store", &self.store.to_string())
            .finish()
    }
}

#[async_trait]
impl ObjectStoreClient for ObjectStoreAdapter {
    async fn get_object(&self, request: GetObject) -> StoreResult<StoredObject> {
        self.check_bucket(&request.bucket)?;
        let path = ObjectPath::from(request.key.as_str());
        let options = GetOptions {
            if_match: request.if_match.clone(),
            if_none_match: request.if_none_match.clone(),
            ..Default::default()
        };

        let result = self
            .store
            .get_opts(&path, options)
            .await
            .map_err(|e| Self::map_error(&request.bucket, &request.key, e))?;
        let fingerprint = result.meta.e_tag.clone().unwrap_or_default();
        let body = result
            .bytes()
            .await
            .map_err(|e| Self::map_error(&request.bucket, &request.key, e))?;

        Ok(StoredObject { body, fingerprint })
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> StoreResult<PutOutcome> {
        self.check_bucket(bucket)?;
        let path = ObjectPath::from(key);

        let result = self
            .store
            .put(&path, PutPayload::from(body))
            .await
            .map_err(|e| Self::map_error(bucket, key, e))?;

        Ok(PutOutcome {
            fingerprint: result.e_tag.unwrap_or_default(),
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.check_bucket(bucket)?;
        let path = ObjectPath::from(key);

        match self.store.delete(&path).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Self::map_error(bucket, key, e)),
        }
    }
}
