//! Database configuration.

use crate::error::{CoreError, CoreResult};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for opening a shared database.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the local copy of the database.
    pub local_file_path: PathBuf,

    /// Delay between attempts to acquire a lock held by someone else.
    pub acquire_lock_retry_timeout: Duration,

    /// How long a pulled copy is trusted for reads without asking the store.
    pub remote_database_cache_time: Duration,

    /// How many times a request is re-run after the remote database was
    /// updated underneath it.
    pub max_retry_on_remote_database_updated: u32,

    /// Upper bound of a lease's validity window.
    pub max_lock_lifetime: Duration,

    /// Lower bound of a lease's validity window.
    pub min_lock_lifetime: Duration,

    /// Treat a missing remote object as an empty database.
    pub allow_missing: bool,

    /// Region used when the address does not carry one.
    pub region: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_file_path: PathBuf::from("/tmp/s3lite"),
            acquire_lock_retry_timeout: Duration::from_millis(100),
            remote_database_cache_time: Duration::from_millis(1000),
            max_retry_on_remote_database_updated: 1,
            max_lock_lifetime: Duration::from_secs(60),
            min_lock_lifetime: Duration::from_secs(1),
            allow_missing: false,
            region: None,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the local cache directory.
    #[must_use]
    pub fn local_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_file_path = path.into();
        self
    }

    /// Sets the lock acquisition retry delay.
    #[must_use]
    pub const fn acquire_lock_retry_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_lock_retry_timeout = timeout;
        self
    }

    /// Sets the remote database cache window.
    #[must_use]
    pub const fn remote_database_cache_time(mut self, window: Duration) -> Self {
        self.remote_database_cache_time = window;
        self
    }

    /// Sets the retry budget for remote-conflict errors.
    #[must_use]
    pub const fn max_retry_on_remote_database_updated(mut self, retries: u32) -> Self {
        self.max_retry_on_remote_database_updated = retries;
        self
    }

    /// Sets the maximum lease lifetime.
    #[must_use]
    pub const fn max_lock_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lock_lifetime = lifetime;
        self
    }

    /// Sets the minimum lease lifetime.
    #[must_use]
    pub const fn min_lock_lifetime(mut self, lifetime: Duration) -> Self {
        self.min_lock_lifetime = lifetime;
        self
    }

    /// Sets whether a missing remote object reads as an empty database.
    #[must_use]
    pub const fn allow_missing(mut self, value: bool) -> Self {
        self.allow_missing = value;
        self
    }

    /// Sets the fallback region.
    #[must_use]
    pub fn region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    /// Checks the configuration for inconsistent values.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if the local path is empty or the minimum
    /// lease lifetime exceeds the maximum.
    pub fn validate(&self) -> CoreResult<()> {
        if self.local_file_path.as_os_str().is_empty() {
            return Err(CoreError::config("local_file_path must not be empty"));
        }
        if self.max_lock_lifetime < self.min_lock_lifetime {
            return Err(CoreError::config(
                "min_lock_lifetime must not exceed max_lock_lifetime",
            ));
        }
        if matches!(&self.region, Some(region) if region.is_empty()) {
            return Err(CoreError::config("region must not be empty"));
        }
        Ok(())
    }
}
