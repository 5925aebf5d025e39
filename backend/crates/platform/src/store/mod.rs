//! Remote Ordered Store
//!
//! The shared key-value store that holds every piece of admission-control
//! state: the queue's ordered set, expiry markers, rate-limit counters,
//! permit buckets and lock entries. Service processes are stateless workers
//! over this store.
//!
//! Each trait method is a single atomic server-side step. Multi-step
//! check-then-act sequences need the lock manager on top.
//!
//! ## Backends
//! - [`RedisStore`] - production backend
//! - [`MemoryStore`] - single-process backend for tests and local runs

mod memory;
mod redis_store;

pub use self::memory::MemoryStore;
pub use self::redis_store::RedisStore;

use std::time::Duration;

/// Store-level failure. The one genuinely exceptional admission-control error.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Store unreachable or command rejected
    #[error("Store connection error: {0}")]
    Connection(#[from] redis::RedisError),

    /// A value exists but cannot be interpreted
    #[error("Corrupt value at {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Store result type alias
pub type StoreResult<T> = Result<T, StoreError>;

/// Operations required from the shared store
#[trait_variant::make(KeyValueStore: Send)]
pub trait LocalKeyValueStore {
    // ------------------------------------------------------------------
    // Ordered set
    // ------------------------------------------------------------------

    /// Insert `member` with `score`. Returns `true` when the member was new.
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool>;

    /// 0-based rank ordered by score, ties broken by member.
    async fn zrank(&self, key: &str, member: &str) -> StoreResult<Option<u64>>;

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>>;

    /// Cardinality, 0 when the set does not exist.
    async fn zcard(&self, key: &str) -> StoreResult<u64>;

    /// Returns `true` when the member was present.
    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool>;

    /// Members with `min <= score <= max`, in rank order.
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>>;

    // ------------------------------------------------------------------
    // Plain values
    // ------------------------------------------------------------------

    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()>;

    /// Atomically replace the value and return the previous one.
    async fn get_set(&self, key: &str, value: &str) -> StoreResult<Option<String>>;

    /// Returns `true` when the key existed.
    async fn del(&self, key: &str) -> StoreResult<bool>;

    /// Returns `false` when the key does not exist.
    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool>;

    /// Remaining TTL. `None` for a missing key or a key without expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;

    // ------------------------------------------------------------------
    // Counters
    // ------------------------------------------------------------------

    async fn incr(&self, key: &str) -> StoreResult<i64>;

    /// Increment; when the result is 1 the key's TTL is set in the same step.
    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<i64>;

    // ------------------------------------------------------------------
    // Locks
    // ------------------------------------------------------------------

    /// Set only when absent. Returns `true` when the value was written.
    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool>;

    /// Delete only when the stored value equals `expected`.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool>;

    // ------------------------------------------------------------------
    // Permit buckets
    // ------------------------------------------------------------------

    /// Grant `permits` when fewer than `capacity` permits were granted in the
    /// trailing `window`, otherwise grant nothing. Never blocks.
    ///
    /// Each granted permit is a lease that lapses `window` after its grant, so
    /// no `window`-long interval ever sees more than `capacity` grants.
    async fn acquire_permits(
        &self,
        key: &str,
        permits: u32,
        capacity: u32,
        window: Duration,
    ) -> StoreResult<bool>;

    /// `capacity` minus the leases still live in the trailing `window`.
    async fn available_permits(&self, key: &str, capacity: u32, window: Duration)
    -> StoreResult<u64>;
}

/// A store handle that can be cloned into spawned tasks
pub trait SharedStore: KeyValueStore + Clone + Send + Sync + 'static {}

impl<T> SharedStore for T where T: KeyValueStore + Clone + Send + Sync + 'static {}
