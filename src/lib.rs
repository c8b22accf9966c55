//! rcache - cache-aside coordination between Redis and MySQL
//!
//! The crate sits between application code and two backing stores, a
//! Redis deployment (single node or cluster) and a relational database,
//! and protects the database from the classical failure modes of naive
//! cache-aside:
//!
//! - Stampedes: concurrent misses for one key collapse into a single
//!   database query (request coalescing)
//! - Penetration: rows known to be absent are cached under a negative
//!   sentinel
//! - Avalanches: every TTL is jittered so entries written together do not
//!   expire together
//!
//! Reads go through [`CachedConn::query_row`]: cache hit, or query plus
//! cache population. Writes go through [`CachedConn::exec`], which
//! invalidates the listed keys only after the statement succeeds.
//! Secondary-index reads resolve the index key to a primary key and the
//! primary key to the row with [`CachedConn::query_row_index`].
//!
//! Shared collaborators (connection registries, the single-flight barrier,
//! statistics) live in a [`CacheScope`] whose lifetime the embedder
//! chooses: per process, per tenant, or per test.

mod cached;
mod cluster;
mod config;
mod error;
mod jitter;
mod node;
mod resource;
mod singleflight;
mod sqlconn;
mod stat;
mod store;
#[cfg(test)]
pub(crate) mod testutil;

pub use cached::{CacheScope, CachedConn};
pub use cluster::Cache;
pub use config::{CacheOptions, ClusterConf, NodeConf, RedisKind};
pub use error::{BatchError, CacheError};
pub use jitter::Jitter;
pub use node::{CacheNode, Cacheable};
pub use resource::{Closable, ResourceManager};
pub use singleflight::SingleFlight;
pub use sqlconn::{PingedPool, SqlConn, SqlManager, TxFuture};
pub use stat::{CacheStat, StatSnapshot};
pub use store::{Redis, RedisPool, Store};

// Re-export async_trait for implementors of the Store and Closable seams.
pub use async_trait::async_trait;
