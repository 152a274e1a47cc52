//! Shared key/value store access for the platform.
//!
//! Bucket state lives in one external store shared by every server
//! instance. This crate owns the connection to that store and exposes the
//! narrow [`KeyValueStore`] seam the rate limiter is written against:
//!
//! - [`RedisStore`] -- the production backend, wrapping one process-wide
//!   [`redis::aio::ConnectionManager`] with bounded reconnection, per
//!   operation deadlines, and a health latch.
//!
//! - [`MemoryStore`] -- an in-process backend with the same semantics
//!   (hash fields, per-key expiry), used by tests and local development.
//!
//! Callers never open their own connection; the store handle is injected
//! and shared by all requests and background workers.

pub mod client;
pub mod memory;

use async_trait::async_trait;
use slipway_common::SlipwayResult;

pub use client::RedisStore;
pub use memory::MemoryStore;

/// The store operations the rate limiter needs: hash multi-get, an atomic
/// hash-write-plus-expire, key deletion, and a health signal.
///
/// Implementations must be safe to call concurrently from many tasks.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Whether the last known connection state is ready. A false reading
    /// means callers should apply their degradation policy instead of
    /// issuing operations.
    fn available(&self) -> bool;

    /// Read the named hash fields of `key`. A missing key yields all
    /// `None`; a missing field yields `None` in its position.
    async fn hash_get(&self, key: &str, fields: &[&str]) -> SlipwayResult<Vec<Option<String>>>;

    /// Write hash fields and refresh the key's TTL as one atomic unit.
    async fn hash_set_expire(
        &self,
        key: &str,
        fields: &[(&str, String)],
        ttl_secs: i64,
    ) -> SlipwayResult<()>;

    /// Remove `key` entirely.
    async fn delete(&self, key: &str) -> SlipwayResult<()>;
}
