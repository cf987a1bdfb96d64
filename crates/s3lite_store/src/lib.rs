//! # s3lite Store
//!
//! Object store client trait and implementations for s3lite.
//!
//! This crate is the lowest layer of s3lite: a remote key/value blob
//! service with S3 semantics. Objects are **opaque byte strings** addressed
//! by `(bucket, key)`; every read and write reports a content fingerprint
//! (the S3 ETag) that callers use for optimistic concurrency.
//!
//! ## Design Principles
//!
//! - Clients do not interpret object bodies
//! - Fingerprints are the quoted hex MD5 of the body, as S3 reports them
//!   for single-part uploads
//! - Conditional reads (`If-None-Match`, `If-Match`) surface as typed errors
//! - Clients must be `Send + Sync` so one instance can be shared
//!
//! ## Available Clients
//!
//! - [`MemoryObjectStore`] - For testing and single-process use
//! - `ObjectStoreAdapter` - Amazon S3 through the `object_store` crate
//!   (feature `aws`)
//!
//! ## Example
//!
//! ```rust
//! use s3lite_store::{GetObject, MemoryObjectStore, ObjectStoreClient};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let store = MemoryObjectStore::new();
//! let put = store
//!     .put_object("bucket", "db.sqlite", b"hello".to_vec().into())
//!     .await
//!     .unwrap();
//! let object = store
//!     .get_object(GetObject::new("bucket", "db.sqlite"))
//!     .await
//!     .unwrap();
//! assert_eq!(object.fingerprint, put.fingerprint);
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[cfg(feature = "aws")]
mod aws;
mod client;
mod error;
mod fingerprint;
mod memory;

#[cfg(feature = "aws")]
pub use aws::ObjectStoreAdapter;
pub use client::{GetObject, ObjectStoreClient, PutOutcome, StoredObject};
pub use error::{StoreError, StoreResult};
pub use fingerprint::{content_fingerprint, content_hash};
pub use memory::{MemoryObjectStore, ObjectStats};
