//! Lease content and adaptive expiry for the distributed lock.
//!
//! A lease is the JSON body of the lock object:
//!
//! ```text
//! {"id":"<hex md5>","validTo":<ms since epoch>}
//! ```
//!
//! The validity window tracks observed pull and push latency so that a
//! lease covers a real pull/push cycle while a crashed holder is recovered
//! from quickly.

use crate::error::CoreResult;
use crate::time::now_millis;
use parking_lot::Mutex;
use s3lite_store::content_hash;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Remote operations whose duration feeds the lease window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Download of the database object.
    Pull,
    /// Upload of the database object.
    Push,
}

/// Exclusive ownership of the remote database until `valid_to`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Opaque unique token.
    #[serde(default)]
    pub id: String,
    /// Expiry, in milliseconds since the Unix epoch.
    #[serde(rename = "validTo")]
    pub valid_to: u64,
}

impl Lease {
    /// Parses a lock object body. Returns `None` for anything malformed.
    pub fn parse(body: &[u8]) -> Option<Self> {
        serde_json::from_slice(body).ok()
    }

    /// Returns true if the lease has not expired at `now` (ms).
    pub fn is_valid_at(&self, now: u64) -> bool {
        self.valid_to >= now
    }
}

/// Builds and validates leases.
///
/// The only state is the latest observed duration per [`OperationKind`].
#[derive(Debug)]
pub struct LeaseManager {
    min_lifetime: u64,
    max_lifetime: u64,
    durations: Mutex<HashMap<OperationKind, u64>>,
}

impl LeaseManager {
    /// Creates a manager clamping lease windows to `[min, max]`.
    pub fn new(min_lifetime: Duration, max_lifetime: Duration) -> Self {
        Self {
            min_lifetime: min_lifetime.as_millis() as u64,
            max_lifetime: max_lifetime.as_millis() as u64,
            durations: Mutex::new(HashMap::new()),
        }
    }

    /// Serializes a fresh lease with a new id and an adaptive expiry.
    pub fn build_content(&self) -> CoreResult<String> {
        let now = now_millis();
        let lease = Lease {
            id: content_hash(format!("{now}-{}", rand::random::<f64>()).as_bytes()),
            valid_to: self.valid_until(now),
        };
        Ok(serde_json::to_string(&lease)?)
    }

    /// Returns true if `body` is a lease that has not yet expired.
    ///
    /// Never fails: malformed bodies are simply not valid.
    pub fn is_valid(&self, body: &[u8]) -> bool {
        Lease::parse(body).is_some_and(|lease| lease.is_valid_at(now_millis()))
    }

    /// Records how long an operation that started at `started_at` (ms) took.
    pub fn record_duration(&self, kind: OperationKind, started_at: u64) {
        let elapsed = now_millis().saturating_sub(started_at);
        self.durations.lock().insert(kind, elapsed);
    }

    /// Computes `validTo` for a lease created at `now`.
    ///
    /// A window below the minimum or above the maximum yields that bound
    /// itself, not `now` plus the bound.
    pub fn valid_until(&self, now: u64) -> u64 {
        let durations = self.durations.lock();
        let factor = if durations.len() < 2 { 3 } else { 2 };
        let window = factor * durations.values().sum::<u64>();

        if window < self.min_lifetime {
            self.min_lifetime
        } else if window > self.max_lifetime {
            self.max_lifetime
        } else {
            now + window
        }
    }

    #[cfg(test)]
    fn set_duration(&self, kind: OperationKind, millis: u64) {
        self.durations.lock().insert(kind, millis);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn manager() -> LeaseManager {
        LeaseManager::new(Duration::from_millis(100), Duration::from_millis(10_000))
    }

    #[test]
    fn no_durations_clamps_to_min_verbatim() {
        let manager = manager();
        assert_eq!(manager.valid_until(1_700_000_000_000), 100);
    }

    #[test]
    fn one_duration_uses_factor_three() {
        let manager = manager();
        manager.set_duration(OperationKind::Pull, 400);
        assert_eq!(manager.valid_until(5_000), 5_000 + 1_200);
    }

    #[test]
    fn two_durations_use_factor_two() {
        let manager = manager();
        manager.set_duration(OperationKind::Pull, 400);
        manager.set_duration(OperationKind::Push, 600);
        assert_eq!(manager.valid_until(5_000), 5_000 + 2_000);
    }

    #[test]
    fn large_window_clamps_to_max_verbatim() {
        let manager = manager();
        manager.set_duration(OperationKind::Pull, 20_000);
        assert_eq!(manager.valid_until(5_000), 10_000);
    }

    #[test]
    fn recording_overwrites_previous_value() {
        let manager = manager();
        manager.set_duration(OperationKind::Pull, 5_000);
        manager.record_duration(OperationKind::Pull, now_millis().saturating_sub(50));

        let recorded = manager.durations.lock()[&OperationKind::Pull];
        assert!((50..1_000).contains(&recorded), "recorded {recorded}");
        assert_eq!(manager.durations.lock().len(), 1);
    }

    #[test]
    fn built_content_parses_with_unique_ids() {
        let manager = manager();
        manager.set_duration(OperationKind::Pull, 1_000);

        let first = Lease::parse(manager.build_content().unwrap().as_bytes()).unwrap();
        let second = Lease::parse(manager.build_content().unwrap().as_bytes()).unwrap();
        assert_eq!(first.id.len(), 32);
        assert_ne!(first.id, second.id);
        assert!(manager.is_valid(serde_json::to_string(&first).unwrap().as_bytes()));
    }

    #[test]
    fn wire_format_uses_valid_to_field() {
        let lease = Lease {
            id: "abc".into(),
            valid_to: 42,
        };
        assert_eq!(
            serde_json::to_string(&lease).unwrap(),
            r#"{"id":"abc","validTo":42}"#
        );
    }

    #[test]
    fn malformed_bodies_are_invalid() {
        let manager = manager();
        assert!(!manager.is_valid(b""));
        assert!(!manager.is_valid(b"not json"));
        assert!(!manager.is_valid(br#"{"id":"x"}"#));
        assert!(!manager.is_valid(br#"{"id":"x","validTo":-5}"#));
    }

    proptest! {
        #[test]
        fn future_leases_are_valid(ahead in 60_000u64..1_000_000_000) {
            let body = format!(r#"{{"id":"p","validTo":{}}}"#, now_millis() + ahead);
            prop_assert!(manager().is_valid(body.as_bytes()));
        }

        #[test]
        fn past_leases_are_invalid(behind in 1u64..1_000_000_000) {
            let body = format!(r#"{{"id":"p","validTo":{}}}"#, now_millis() - behind);
            prop_assert!(!manager().is_valid(body.as_bytes()));
        }

        #[test]
        fn arbitrary_bytes_never_panic(body in proptest::collection::vec(any::<u8>(), 0..64)) {
            let _ = manager().is_valid(&body);
        }
    }
}
