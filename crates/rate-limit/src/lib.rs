//! Distributed token-bucket rate limiting for the platform.
//!
//! Bucket state is shared across server instances through the external
//! key/value store, so an identifier is limited consistently no matter
//! which instance serves the request. The crate splits into three parts:
//!
//! - [`bucket`] -- the pure refill arithmetic: `(bucket, now)` in,
//!   `(new bucket, decision)` out. No I/O, fully reentrant.
//!
//! - [`store`] -- [`BucketStore`], the read-modify-write cycle against
//!   the shared store: load or create the bucket hash, run the refill
//!   engine, persist the new state and refresh the TTL atomically.
//!
//! - [`policy`] -- the plan-to-limit table and client-address
//!   normalization that decide what "one tenant" means.
//!
//! Concurrent admission checks for the same identifier race by design:
//! there is no compare-and-set, and a burst of N concurrent racers can
//! over-admit at most N-1 requests. The refill timestamp advances on
//! denial as well, which keeps the last writer's state a legal
//! continuation of the bucket's history.

pub mod bucket;
pub mod policy;
pub mod store;

pub use bucket::{refill_and_take, Bucket, Decision};
pub use policy::{normalize_client_addr, PlanTable};
pub use store::BucketStore;
