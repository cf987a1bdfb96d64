//! In-memory object store for testing.

use crate::client::{GetObject, ObjectStoreClient, PutOutcome, StoredObject};
use crate::error::{StoreError, StoreResult};
use crate::fingerprint::content_fingerprint;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, VecDeque};

/// Per-key request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObjectStats {
    /// Number of `get_object` calls.
    pub gets: u64,
    /// Number of `put_object` calls.
    pub puts: u64,
    /// Number of `delete_object` calls.
    pub deletes: u64,
}

/// An in-memory object store with S3-compatible fingerprints.
///
/// This store keeps all objects in memory and is suitable for:
/// - Unit and integration tests
/// - Several "processes" sharing one `Arc<MemoryObjectStore>` in one binary
///
/// Every request through [`ObjectStoreClient`] is counted per key, so tests
/// can assert exactly how many reads and writes a protocol performed.
/// Writes made with [`MemoryObjectStore::insert`] are not counted; they
/// model an external writer.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across tasks.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    stats: Mutex<HashMap<String, ObjectStats>>,
    fingerprint_overrides: Mutex<HashMap<String, VecDeque<String>>>,
}

impl MemoryObjectStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores an object without counting the request.
    ///
    /// Returns the fingerprint of the stored body.
    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) -> String {
        let body = body.into();
        let fingerprint = content_fingerprint(&body);
        self.objects.write().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body,
                fingerprint: fingerprint.clone(),
            },
        );
        fingerprint
    }

    /// Removes an object without counting the request.
    pub fn remove(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .write()
            .remove(&(bucket.to_string(), key.to_string()))
    }

    /// Returns a copy of an object, if present.
    #[must_use]
    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .read()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    /// Returns the request counters for `key`.
    #[must_use]
    pub fn stats(&self, key: &str) -> ObjectStats {
        self.stats.lock().get(key).copied().unwrap_or_default()
    }

    /// Clears all request counters.
    pub fn reset_stats(&self) {
        self.stats.lock().clear();
    }

    /// Makes the next `put_object` on `key` report `fingerprint` instead of
    /// the real one, as a store that rewrote the object would.
    pub fn override_next_fingerprint(&self, key: &str, fingerprint: impl Into<String>) {
        self.fingerprint_overrides
            .lock()
            .entry(key.to_string())
            .or_default()
            .push_back(fingerprint.into());
    }

    fn count(&self, key: &str, update: impl FnOnce(&mut ObjectStats)) {
        update(self.stats.lock().entry(key.to_string()).or_default());
    }
}

#[async_trait]
impl ObjectStoreClient for MemoryObjectStore {
    async fn get_object(&self, request: GetObject) -> StoreResult<StoredObject> {
        self.count(&request.key, |stats| stats.gets += 1);

        let object = self
            .object(&request.bucket, &request.key)
            .ok_or_else(|| StoreError::not_found(&request.bucket, &request.key))?;

        if let Some(expected) = &request.if_match {
            if *expected != object.fingerprint {
                return Err(StoreError::precondition_failed(
                    &request.bucket,
                    &request.key,
                ));
            }
        }
        if let Some(known) = &request.if_none_match {
            if *known == object.fingerprint {
                return Err(StoreError::not_modified(&request.bucket, &request.key));
            }
        }

        Ok(object)
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> StoreResult<PutOutcome> {
        self.count(key, |stats| stats.puts += 1);

        let stored = self.insert(bucket, key, body);
        let reported = self
            .fingerprint_overrides
            .lock()
            .get_mut(key)
            .and_then(VecDeque::pop_front)
            .unwrap_or(stored);

        Ok(PutOutcome {
            fingerprint: reported,
        })
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.count(key, |stats| stats.deletes += 1);
        self.remove(bucket, key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let store = MemoryObjectStore::new();
        let result = store.get_object(GetObject::new("b", "missing")).await;
        assert!(matches!(result, Err(StoreError::NotFound { .. })));
        assert_eq!(store.stats("missing").gets, 1);
    }

    #[tokio::test]
    async fn put_reports_md5_fingerprint() {
        let store = MemoryObjectStore::new();
        let outcome = store
            .put_object("b", "k", Bytes::from_static(b"payload"))
            .await
            .unwrap();
        assert_eq!(outcome.fingerprint, content_fingerprint(b"payload"));

        let object = store.get_object(GetObject::new("b", "k")).await.unwrap();
        assert_eq!(&object.body[..], b"payload");
        assert_eq!(object.fingerprint, outcome.fingerprint);
    }

    #[tokio::test]
    async fn if_none_match_reports_not_modified() {
        let store = MemoryObjectStore::new();
        let fingerprint = store.insert("b", "k", b"v1".to_vec());

        let unchanged = store
            .get_object(GetObject::new("b", "k").if_none_match(Some(fingerprint.clone())))
            .await;
        assert!(matches!(unchanged, Err(StoreError::NotModified { .. })));

        store.insert("b", "k", b"v2".to_vec());
        let changed = store
            .get_object(GetObject::new("b", "k").if_none_match(Some(fingerprint)))
            .await
            .unwrap();
        assert_eq!(&changed.body[..], b"v2");
    }

    #[tokio::test]
    async fn if_match_reports_precondition_failed() {
        let store = MemoryObjectStore::new();
        let fingerprint = store.insert("b", "k", b"v1".to_vec());

        assert!(store
            .get_object(GetObject::new("b", "k").if_match(fingerprint))
            .await
            .is_ok());

        let result = store
            .get_object(GetObject::new("b", "k").if_match("\"other\""))
            .await;
        assert!(matches!(result, Err(StoreError::PreconditionFailed { .. })));
    }

    #[tokio::test]
    async fn fingerprint_override_applies_once() {
        let store = MemoryObjectStore::new();
        store.override_next_fingerprint("k", "\"tampered\"");

        let first = store.put_object("b", "k", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(first.fingerprint, "\"tampered\"");

        let second = store.put_object("b", "k", Bytes::from_static(b"x")).await.unwrap();
        assert_eq!(second.fingerprint, content_fingerprint(b"x"));
    }

    #[tokio::test]
    async fn insert_and_remove_are_not_counted() {
        let store = MemoryObjectStore::new();
        store.insert("b", "k", b"v".to_vec());
        store.delete_object("b", "k").await.unwrap();
        assert!(store.object("b", "k").is_none());

        let stats = store.stats("k");
        assert_eq!(stats, ObjectStats { gets: 0, puts: 0, deletes: 1 });

        store.reset_stats();
        assert_eq!(store.stats("k"), ObjectStats::default());
    }
}
