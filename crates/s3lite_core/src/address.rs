//! Parsing of database addresses.

use crate::error::{CoreError, CoreResult};
use regex::Regex;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

// https://bucket-name.s3.region.amazonaws.com/key
static VIRTUAL_HOSTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://([a-z0-9]([a-z0-9-]*(\.[a-z0-9])?))\.s3\.([a-z]{2}-[a-z]{4,}-[1-9])\.amazonaws\.com/(.+)$",
    )
    .expect("address pattern is valid")
});

// https://s3.region.amazonaws.com/bucket-name/key
static PATH_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^https?://s3\.([a-z]{2}-[a-z]{4,}-[1-9])\.amazonaws\.com/([a-z0-9]([a-z0-9-]*(\.[a-z0-9])?))/(.+)$",
    )
    .expect("address pattern is valid")
});

// s3://bucket-name/key
static SCHEME_STYLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^s3://([a-z0-9]([a-z0-9-]*(\.[a-z0-9])?))/(.+)$")
        .expect("address pattern is valid")
});

/// Location of a shared database in the object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseAddress {
    /// Bucket holding the database object.
    pub bucket: String,
    /// Key of the database object.
    pub key: String,
    /// Region named by the address, if any.
    pub region: Option<String>,
}

impl DatabaseAddress {
    /// Parses a virtual-hosted, path-style or `s3://` address.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidAddress` when no form matches or the key
    /// has no name a local copy could be stored under.
    pub fn parse(address: &str) -> CoreResult<Self> {
        let parsed = if let Some(caps) = VIRTUAL_HOSTED.captures(address) {
            Self {
                bucket: caps[1].to_string(),
                key: caps[5].to_string(),
                region: Some(caps[4].to_string()),
            }
        } else if let Some(caps) = PATH_STYLE.captures(address) {
            Self {
                bucket: caps[2].to_string(),
                key: caps[5].to_string(),
                region: Some(caps[1].to_string()),
            }
        } else if let Some(caps) = SCHEME_STYLE.captures(address) {
            Self {
                bucket: caps[1].to_string(),
                key: caps[4].to_string(),
                region: None,
            }
        } else {
            return Err(CoreError::InvalidAddress {
                address: address.to_string(),
            });
        };

        if local_name(&parsed.key).as_os_str().is_empty() {
            return Err(CoreError::InvalidAddress {
                address: address.to_string(),
            });
        }
        Ok(parsed)
    }

    /// Path of the local copy under `root`.
    ///
    /// Only the plain name segments of the key are kept, so root, `.` and
    /// `..` segments can never place the copy outside `root`.
    pub fn local_path(&self, root: &Path) -> PathBuf {
        root.join(local_name(&self.key))
    }

    /// Key of the lock object guarding this database.
    pub fn lock_key(&self) -> String {
        format!("{}.lock", self.key)
    }

    /// Picks the address region, falling back to `fallback`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if neither names a region.
    pub fn resolve_region(&self, fallback: Option<&str>) -> CoreResult<String> {
        self.region
            .as_deref()
            .or(fallback)
            .map(str::to_string)
            .ok_or_else(|| CoreError::config("a region configuration value is required"))
    }
}

fn local_name(key: &str) -> PathBuf {
    Path::new(key)
        .components()
        .filter_map(|component| match component {
            Component::Normal(part) => Some(part),
            _ => None,
        })
        .collect()
}
