//! # s3lite Core
//!
//! A SQLite database shared by many processes through an object store.
//!
//! The authoritative copy of the database is one object in a bucket. Each
//! process keeps a local copy, executes SQL against it with an embedded
//! engine and synchronizes with the store:
//!
//! - Reads pull the object (or reuse a recently checked local copy) and run
//!   without locking
//! - Writes take a lease-based lock stored next to the database, pull a
//!   fresh copy, execute, push the result and release the lock
//! - `BEGIN` holds the lock across calls until `COMMIT` or `ROLLBACK`
//! - A push whose fingerprint disagrees with the store is a conflict; the
//!   whole request is re-run up to a configured number of times
//!
//! All calls on one [`Database`] go through a single [`OperationQueue`], so
//! at most one step is in flight and the steps of one call never interleave
//! with a failed earlier step of the same call.
//!
//! ## Crate Layout
//!
//! - [`Database`] / [`Statement`] - the public facade
//! - [`Executor`] - turns requests into queued steps
//! - [`RemoteSync`] - lock, pull and push against an `ObjectStoreClient`
//! - [`LeaseManager`] - lease content and adaptive expiry
//! - [`EngineConnector`] - the local engine; [`SqliteConnector`] with the
//!   `sqlite` feature

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod address;
mod config;
mod database;
mod engine;
mod error;
mod executor;
mod fs;
mod lease;
mod queue;
mod remote;
mod statement;
mod time;

pub use address::DatabaseAddress;
pub use config::Config;
pub use database::{Database, RunResult};
#[cfg(feature = "sqlite")]
pub use engine::{SqliteConnection, SqliteConnector};
pub use engine::{
    Arg, EngineConnection, EngineConnector, Params, Row, RunInfo, StatementId, Value,
};
pub use error::{CoreError, CoreResult};
pub use executor::{
    normalize_params, ExecOutcome, ExecRequest, ExecResult, ExecTarget, Executor, Method,
    StatementHandle, StatementKind,
};
pub use fs::{read_file, save_to_file};
pub use lease::{Lease, LeaseManager, OperationKind};
pub use queue::{OperationQueue, Pending, QueueBatch, QueueGroup};
pub use remote::{LockStatus, RemoteDatabase, RemoteSync};
pub use statement::Statement;
pub use time::now_millis;

/// Builds a `Vec<Arg>` from values.
///
/// ```rust
/// use s3lite_core::{params, Arg, Value};
///
/// let args = params![1, "two", None::<f64>];
/// assert_eq!(args[1], Arg::Value(Value::Text("two".into())));
/// assert!(params![].is_empty());
/// ```
#[macro_export]
macro_rules! params {
    () => {
        ::std::vec::Vec::<$crate::Arg>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::Arg::from($value)),+]
    };
}
