//! Lock and sync protocol against the object store.
//!
//! Each shared database is two objects: the database file under its key and
//! a lock object under `<key>.lock` whose body is a [`Lease`]. Writers hold
//! the lock across pull, local execution and push. Readers only pull.

use crate::address::DatabaseAddress;
use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::fs::{read_file, save_to_file};
use crate::lease::{Lease, LeaseManager, OperationKind};
use crate::time::now_millis;
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use s3lite_store::{content_fingerprint, GetObject, ObjectStoreClient};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// State of the lock object as seen by [`RemoteDatabase::lock_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockStatus {
    /// No lock object exists.
    Unlocked,
    /// A lock object exists.
    Held {
        /// The parsed lease, or `None` if the body is not a lease.
        lease: Option<Lease>,
        /// Whether the lease is still within its validity window.
        valid: bool,
    },
}

/// Remote side of a shared database.
///
/// Implemented by [`RemoteSync`]; the executor only talks to this trait.
#[async_trait]
pub trait RemoteDatabase: Send + Sync {
    /// Blocks until this process holds the lock.
    ///
    /// # Errors
    ///
    /// Returns any store error other than a missing lock object.
    async fn acquire_lock(&self) -> CoreResult<()>;

    /// Deletes the lock if it still carries the lease this process holds.
    ///
    /// Never fails.
    async fn release_lock(&self);

    /// Makes the local copy current and returns its path.
    ///
    /// # Errors
    ///
    /// Returns store errors (including `NotFound` unless missing databases
    /// are allowed) and local I/O errors.
    async fn pull_database(&self, use_cache: bool) -> CoreResult<PathBuf>;

    /// Uploads the local copy.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::RemoteDatabaseUpdated` if the store reports a
    /// different fingerprint than the uploaded body has.
    async fn push_database(&self) -> CoreResult<()>;

    /// Reads the lock object without modifying it.
    ///
    /// # Errors
    ///
    /// Returns store errors other than a missing lock object.
    async fn lock_status(&self) -> CoreResult<LockStatus>;
}

#[derive(Debug, Default)]
struct SyncState {
    fingerprint: Option<String>,
    last_checked: Option<u64>,
    held_lease: Option<String>,
}

/// [`RemoteDatabase`] over an [`ObjectStoreClient`].
pub struct RemoteSync {
    store: Arc<dyn ObjectStoreClient>,
    bucket: String,
    key: String,
    lock_key: String,
    local_file: PathBuf,
    retry_delay: Duration,
    cache_window: u64,
    allow_missing: bool,
    leases: LeaseManager,
    state: Mutex<SyncState>,
}

impl RemoteSync {
    /// Creates a coordinator for the database at `address`.
    ///
    /// The local copy lives under `config.local_file_path`, see
    /// [`DatabaseAddress::local_path`].
    pub fn new(
        store: Arc<dyn ObjectStoreClient>,
        address: &DatabaseAddress,
        config: &Config,
    ) -> Self {
        Self {
            store,
            bucket: address.bucket.clone(),
            key: address.key.clone(),
            lock_key: address.lock_key(),
            local_file: address.local_path(&config.local_file_path),
            retry_delay: config.acquire_lock_retry_timeout,
            cache_window: config.remote_database_cache_time.as_millis() as u64,
            allow_missing: config.allow_missing,
            leases: LeaseManager::new(config.min_lock_lifetime, config.max_lock_lifetime),
            state: Mutex::new(SyncState::default()),
        }
    }

    /// Path of the local copy.
    pub fn local_file(&self) -> &Path {
        &self.local_file
    }

    /// Writes a fresh lease. Returns false if another writer overtook it.
    async fn create_lock(&self) -> CoreResult<bool> {
        let content = self.leases.build_content()?;
        let expected = content_fingerprint(content.as_bytes());
        let outcome = self
            .store
            .put_object(&self.bucket, &self.lock_key, Bytes::from(content.clone()))
            .await?;

        if outcome.fingerprint != expected {
            debug!(key = %self.lock_key, "lock write was overtaken");
            return Ok(false);
        }
        self.state.lock().held_lease = Some(content);
        Ok(true)
    }
}

impl std::fmt::Debug for RemoteSync {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSync")
            .field("bucket", &self.bucket)
            .field("key", &self.key)
            .field("local_file", &self.local_file)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl RemoteDatabase for RemoteSync {
    async fn acquire_lock(&self) -> CoreResult<()> {
        loop {
            let request = GetObject::new(&self.bucket, &self.lock_key);
            match self.store.get_object(request).await {
                Ok(lock) => {
                    let ours = self
                        .state
                        .lock()
                        .held_lease
                        .as_deref()
                        .is_some_and(|held| held.as_bytes() == &lock.body[..]);
                    if ours {
                        debug!(key = %self.lock_key, "taking over our own stale lock");
                    } else if self.leases.is_valid(&lock.body) {
                        debug!(key = %self.lock_key, "lock is held elsewhere, waiting");
                        tokio::time::sleep(self.retry_delay).await;
                        continue;
                    }
                }
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e.into()),
            }

            if self.create_lock().await? {
                info!(key = %self.lock_key, "lock acquired");
                return Ok(());
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    async fn release_lock(&self) {
        let Some(lease) = self.state.lock().held_lease.take() else {
            return;
        };

        let request = GetObject::new(&self.bucket, &self.lock_key)
            .if_match(content_fingerprint(lease.as_bytes()));
        if let Err(e) = self.store.get_object(request).await {
            debug!(key = %self.lock_key, error = %e, "lock is no longer ours");
            return;
        }
        match self.store.delete_object(&self.bucket, &self.lock_key).await {
            Ok(()) => info!(key = %self.lock_key, "lock released"),
            Err(e) => debug!(key = %self.lock_key, error = %e, "failed to delete lock"),
        }
    }

    async fn pull_database(&self, use_cache: bool) -> CoreResult<PathBuf> {
        let started = now_millis();
        let (fingerprint, last_checked) = {
            let state = self.state.lock();
            (state.fingerprint.clone(), state.last_checked)
        };

        let fresh = last_checked.is_some_and(|at| started.saturating_sub(at) <= self.cache_window);
        if use_cache && fresh {
            debug!(key = %self.key, "using cached database");
            return Ok(self.local_file.clone());
        }

        let request = GetObject::new(&self.bucket, &self.key).if_none_match(fingerprint);
        match self.store.get_object(request).await {
            Ok(object) => {
                {
                    let mut state = self.state.lock();
                    state.last_checked = Some(now_millis());
                    state.fingerprint = Some(object.fingerprint.clone());
                }
                save_to_file(&self.local_file, &object.body).await?;
                self.leases.record_duration(OperationKind::Pull, started);
                debug!(key = %self.key, fingerprint = %object.fingerprint, "database pulled");
                Ok(self.local_file.clone())
            }
            // Only possible when a fingerprint was sent, so the local copy
            // already holds that version.
            Err(e) if e.is_not_modified() => {
                debug!(key = %self.key, "database not modified");
                Ok(self.local_file.clone())
            }
            Err(e) if e.is_not_found() && self.allow_missing => {
                debug!(key = %self.key, "database missing, starting empty");
                save_to_file(&self.local_file, b"").await?;
                Ok(self.local_file.clone())
            }
            Err(e) => {
                if !e.is_not_found() {
                    self.state.lock().last_checked = Some(now_millis());
                }
                Err(e.into())
            }
        }
    }

    async fn push_database(&self) -> CoreResult<()> {
        let started = now_millis();
        let body = read_file(&self.local_file).await?;
        let expected = content_fingerprint(&body);
        let outcome = self
            .store
            .put_object(&self.bucket, &self.key, Bytes::from(body))
            .await?;

        if outcome.fingerprint != expected {
            return Err(CoreError::RemoteDatabaseUpdated {
                key: self.key.clone(),
                expected,
                actual: outcome.fingerprint,
            });
        }

        self.leases.record_duration(OperationKind::Push, started);
        info!(key = %self.key, fingerprint = %expected, "database pushed");
        self.state.lock().fingerprint = Some(expected);
        Ok(())
    }

    async fn lock_status(&self) -> CoreResult<LockStatus> {
        match self
            .store
            .get_object(GetObject::new(&self.bucket, &self.lock_key))
            .await
        {
            Ok(lock) => {
                let lease = Lease::parse(&lock.body);
                let valid = lease
                    .as_ref()
                    .is_some_and(|lease| lease.is_valid_at(now_millis()));
                Ok(LockStatus::Held { lease, valid })
            }
            Err(e) if e.is_not_found() => Ok(LockStatus::Unlocked),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use s3lite_store::{
        MemoryObjectStore, ObjectStats, PutOutcome, StoreError, StoreResult, StoredObject,
    };
    use tempfile::{tempdir, TempDir};

    const BUCKET: &str = "bucket";
    const KEY: &str = "db.sqlite";
    const LOCK: &str = "db.sqlite.lock";

    fn setup(config: Config) -> (Arc<MemoryObjectStore>, RemoteSync, TempDir) {
        let dir = tempdir().unwrap();
        let config = config
            .local_file_path(dir.path())
            .acquire_lock_retry_timeout(Duration::from_millis(5));
        let store = Arc::new(MemoryObjectStore::new());
        let address = DatabaseAddress::parse(&format!("s3://{BUCKET}/{KEY}")).unwrap();
        let remote = RemoteSync::new(store.clone(), &address, &config);
        (store, remote, dir)
    }

    fn foreign_lease(valid_to: u64) -> Vec<u8> {
        format!(r#"{{"id":"someone-else","validTo":{valid_to}}}"#).into_bytes()
    }

    #[tokio::test]
    async fn acquire_without_lock_writes_one_lease() {
        let (store, remote, _dir) = setup(Config::new());

        remote.acquire_lock().await.unwrap();

        let stats = store.stats(LOCK);
        assert_eq!((stats.gets, stats.puts), (1, 1));
        let lock = store.object(BUCKET, LOCK).unwrap();
        assert!(Lease::parse(&lock.body).is_some());
    }

    #[tokio::test]
    async fn acquire_replaces_expired_lock() {
        let (store, remote, _dir) = setup(Config::new());
        store.insert(BUCKET, LOCK, foreign_lease(1));

        remote.acquire_lock().await.unwrap();

        assert_eq!(store.stats(LOCK).puts, 1);
        let lease = Lease::parse(&store.object(BUCKET, LOCK).unwrap().body).unwrap();
        assert_ne!(lease.id, "someone-else");
    }

    #[tokio::test]
    async fn acquire_waits_for_valid_lock() {
        let (store, remote, _dir) = setup(Config::new());
        store.insert(BUCKET, LOCK, foreign_lease(now_millis() + 60_000));

        let remote = Arc::new(remote);
        let task = tokio::spawn({
            let remote = remote.clone();
            async move { remote.acquire_lock().await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        assert_eq!(store.stats(LOCK).puts, 0);
        assert!(store.stats(LOCK).gets > 1);

        store.remove(BUCKET, LOCK);
        task.await.unwrap().unwrap();
        assert_eq!(store.stats(LOCK).puts, 1);
    }

    #[tokio::test]
    async fn acquire_waits_until_lease_expires() {
        let (store, remote, _dir) = setup(Config::new());
        store.insert(BUCKET, LOCK, foreign_lease(now_millis() + 30));

        tokio::time::timeout(Duration::from_secs(1), remote.acquire_lock())
            .await
            .unwrap()
            .unwrap();

        let stats = store.stats(LOCK);
        assert!(stats.gets > 1);
        assert_eq!(stats.puts, 1);
        let lease = Lease::parse(&store.object(BUCKET, LOCK).unwrap().body).unwrap();
        assert_ne!(lease.id, "someone-else");
    }

    #[tokio::test]
    async fn acquire_retries_when_overtaken() {
        let (store, remote, _dir) = setup(Config::new());
        store.override_next_fingerprint(LOCK, "\"overtaken\"");

        remote.acquire_lock().await.unwrap();

        let stats = store.stats(LOCK);
        assert_eq!((stats.gets, stats.puts), (2, 2));
    }

    #[tokio::test]
    async fn acquire_takes_over_own_lock() {
        let (store, remote, _dir) = setup(Config::new());
        // One recorded duration of 10s gives a 30s window.
        remote
            .leases
            .record_duration(OperationKind::Pull, now_millis() - 10_000);
        remote.acquire_lock().await.unwrap();
        assert!(remote.leases.is_valid(&store.object(BUCKET, LOCK).unwrap().body));

        tokio::time::timeout(Duration::from_secs(1), remote.acquire_lock())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(store.stats(LOCK).puts, 2);
    }

    #[tokio::test]
    async fn release_deletes_held_lock() {
        let (store, remote, _dir) = setup(Config::new());
        remote.acquire_lock().await.unwrap();

        remote.release_lock().await;

        assert!(store.object(BUCKET, LOCK).is_none());
        assert_eq!(store.stats(LOCK).deletes, 1);
        assert!(remote.state.lock().held_lease.is_none());
    }

    #[tokio::test]
    async fn release_without_lease_does_nothing() {
        let (store, remote, _dir) = setup(Config::new());
        store.insert(BUCKET, LOCK, foreign_lease(1));

        remote.release_lock().await;

        assert_eq!(store.stats(LOCK), ObjectStats::default());
        assert!(store.object(BUCKET, LOCK).is_some());
    }

    #[tokio::test]
    async fn release_leaves_foreign_lock() {
        let (store, remote, _dir) = setup(Config::new());
        remote.acquire_lock().await.unwrap();
        store.insert(BUCKET, LOCK, foreign_lease(now_millis() + 60_000));

        remote.release_lock().await;

        assert_eq!(store.stats(LOCK).deletes, 0);
        assert!(store.object(BUCKET, LOCK).is_some());
        assert!(remote.state.lock().held_lease.is_none());
    }

    #[tokio::test]
    async fn pull_writes_local_copy_and_caches() {
        let (store, remote, _dir) =
            setup(Config::new().remote_database_cache_time(Duration::from_secs(60)));
        store.insert(BUCKET, KEY, b"v1".to_vec());

        let path = remote.pull_database(true).await.unwrap();
        assert_eq!(read_file(&path).await.unwrap(), b"v1");

        remote.pull_database(true).await.unwrap();
        assert_eq!(store.stats(KEY).gets, 1);

        store.insert(BUCKET, KEY, b"v2".to_vec());
        remote.pull_database(false).await.unwrap();
        assert_eq!(store.stats(KEY).gets, 2);
        assert_eq!(read_file(&path).await.unwrap(), b"v2");
    }

    #[tokio::test]
    async fn local_copy_stays_in_cache_dir() {
        let cache = tempdir().unwrap();
        let elsewhere = tempdir().unwrap();
        let key = format!("{}/escaped.db", elsewhere.path().display());
        let address = DatabaseAddress::parse(&format!("s3://{BUCKET}/{key}")).unwrap();
        let config = Config::new().local_file_path(cache.path());
        let store = Arc::new(MemoryObjectStore::new());
        store.insert(BUCKET, &key, b"remote".to_vec());
        let remote = RemoteSync::new(store.clone(), &address, &config);

        let path = remote.pull_database(false).await.unwrap();

        assert!(path.starts_with(cache.path()));
        assert_eq!(read_file(&path).await.unwrap(), b"remote");
        assert!(!elsewhere.path().join("escaped.db").exists());

        remote.push_database().await.unwrap();
        assert_eq!(&store.object(BUCKET, &key).unwrap().body[..], b"remote");
    }

    #[tokio::test]
    async fn pull_outside_cache_window_revalidates() {
        let (store, remote, _dir) =
            setup(Config::new().remote_database_cache_time(Duration::ZERO));
        store.insert(BUCKET, KEY, b"v1".to_vec());
        remote.pull_database(true).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let path = remote.pull_database(true).await.unwrap();

        assert_eq!(store.stats(KEY).gets, 2);
        assert_eq!(read_file(&path).await.unwrap(), b"v1");
    }

    #[tokio::test]
    async fn pull_missing_database() {
        let (_store, remote, _dir) = setup(Config::new());
        let err = remote.pull_database(true).await.unwrap_err();
        assert!(err.is_not_found());

        let (_store, remote, _dir) = setup(Config::new().allow_missing(true));
        let path = remote.pull_database(true).await.unwrap();
        assert!(read_file(&path).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn push_records_fingerprint() {
        let (store, remote, _dir) = setup(Config::new());
        save_to_file(remote.local_file(), b"local").await.unwrap();

        remote.push_database().await.unwrap();

        assert_eq!(&store.object(BUCKET, KEY).unwrap().body[..], b"local");
        assert_eq!(
            remote.state.lock().fingerprint.as_deref(),
            Some(content_fingerprint(b"local").as_str())
        );
    }

    #[tokio::test]
    async fn push_mismatch_is_a_conflict() {
        let (store, remote, _dir) = setup(Config::new());
        store.insert(BUCKET, KEY, b"v1".to_vec());
        remote.pull_database(false).await.unwrap();
        let pulled = remote.state.lock().fingerprint.clone();

        store.override_next_fingerprint(KEY, "\"rewritten\"");
        let err = remote.push_database().await.unwrap_err();

        assert!(err.is_remote_updated());
        assert_eq!(remote.state.lock().fingerprint, pulled);
    }

    #[tokio::test]
    async fn lock_status_reports_lease() {
        let (store, remote, _dir) = setup(Config::new());
        assert_eq!(remote.lock_status().await.unwrap(), LockStatus::Unlocked);

        store.insert(BUCKET, LOCK, foreign_lease(now_millis() + 60_000));
        match remote.lock_status().await.unwrap() {
            LockStatus::Held { lease, valid } => {
                assert_eq!(lease.unwrap().id, "someone-else");
                assert!(valid);
            }
            LockStatus::Unlocked => panic!("expected a held lock"),
        }

        store.insert(BUCKET, LOCK, b"garbage".to_vec());
        assert_eq!(
            remote.lock_status().await.unwrap(),
            LockStatus::Held { lease: None, valid: false }
        );
    }

    struct BrokenStore;

    #[async_trait]
    impl ObjectStoreClient for BrokenStore {
        async fn get_object(&self, _request: GetObject) -> StoreResult<StoredObject> {
            Err(StoreError::transport("connection reset"))
        }

        async fn put_object(
            &self,
            _bucket: &str,
            _key: &str,
            _body: Bytes,
        ) -> StoreResult<PutOutcome> {
            Err(StoreError::transport("connection reset"))
        }

        async fn delete_object(&self, _bucket: &str, _key: &str) -> StoreResult<()> {
            Err(StoreError::transport("connection reset"))
        }
    }

    #[tokio::test]
    async fn transport_errors_mark_check_time() {
        let dir = tempdir().unwrap();
        let config = Config::new().local_file_path(dir.path());
        let address = DatabaseAddress::parse("s3://bucket/db.sqlite").unwrap();
        let remote = RemoteSync::new(Arc::new(BrokenStore), &address, &config);

        let err = remote.pull_database(false).await.unwrap_err();
        assert!(matches!(err, CoreError::Store(StoreError::Transport { .. })));
        assert!(remote.state.lock().last_checked.is_some());

        assert!(remote.acquire_lock().await.is_err());
        remote.release_lock().await;
    }
}
