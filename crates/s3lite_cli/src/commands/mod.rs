//! CLI command implementations.

pub mod exec;
pub mod lock;
pub mod query;
