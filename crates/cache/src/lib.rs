//! SQLite cache of everything previous runs learned.
//!
//! The cache is not the source of truth: the remote catalog is. Deleting the
//! database file only means the next run treats every resource as new. For
//! the same reason, nothing in here is allowed to fail a run: [`Cache`]
//! wraps the fallible [`Repository`] and degrades to "nothing is known"
//! whenever the store is unavailable or corrupt.
//!
//! # Architecture
//! The cache stores three entity types:
//! - **Resources**: the durable projection of a resource that reached a
//!   terminal state, keyed by (identity URL, course id).
//! - **Known-bad URLs**: URLs that produced failed or invalid downloads, so
//!   subsequent runs do not pay the retry cost again.
//! - **Courses**: the course id → name registry.

mod cache;
mod db;
pub mod error;
mod models;
mod record;
mod repo;

pub use crate::cache::Cache;
pub use crate::db::Database;
pub use crate::record::{CacheRecord, Lookup};
pub use crate::repo::Repository;
