//! Repository Traits
//!
//! Interfaces for queue persistence. Implementation is in infrastructure layer.
//!
//! Each method is individually atomic. Sequences that must be atomic as a
//! whole (capacity check + duplicate check + insert) are serialized by the
//! caller with the distributed lock.

use crate::domain::value_objects::PrincipalId;
use crate::error::QueueResult;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Virtual queue repository trait
#[trait_variant::make(QueueRepository: Send)]
pub trait LocalQueueRepository {
    /// Insert with `entered_at` as the ordering score, refresh the queue's own
    /// TTL and write the expiry marker. Returns `false` if the member existed.
    async fn insert(
        &self,
        principal: &PrincipalId,
        entered_at: DateTime<Utc>,
        max_wait: Duration,
    ) -> QueueResult<bool>;

    /// 0-based rank, `None` when absent
    async fn rank(&self, principal: &PrincipalId) -> QueueResult<Option<u64>>;

    async fn entered_at(&self, principal: &PrincipalId) -> QueueResult<Option<DateTime<Utc>>>;

    async fn total_waiting(&self) -> QueueResult<u64>;

    /// Remove the entry and its expiry marker. Returns `true` if it was queued.
    async fn remove(&self, principal: &PrincipalId) -> QueueResult<bool>;

    /// Principals that entered at or before `cutoff`, oldest first
    async fn entered_before(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<PrincipalId>>;

    /// Count one admission handed downstream
    async fn record_processed(&self) -> QueueResult<()>;

    /// Read and reset the admission counter in one step
    async fn take_processed(&self) -> QueueResult<u64>;

    async fn publish_processing_rate(&self, rate: f64) -> QueueResult<()>;

    /// Last published rate, `None` before the first recomputation
    async fn processing_rate(&self) -> QueueResult<Option<f64>>;
}
