//! Virtual Queue Use Cases
//!
//! The admission gate. Enqueue is the only check-then-act sequence and runs
//! under the per-principal distributed lock; every other operation is a
//! single atomic store step or a lock-free read.

use crate::application::config::QueueConfig;
use crate::domain::entities::{Admission, QueuePosition};
use crate::domain::repository::QueueRepository;
use crate::domain::value_objects::PrincipalId;
use crate::error::{QueueError, QueueResult};
use crate::infra::store::lock_key;
use chrono::Utc;
use platform::lock::DistributedLockManager;
use platform::store::SharedStore;
use std::sync::Arc;

/// Virtual Queue service
pub struct VirtualQueue<R, S>
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    repo: Arc<R>,
    locks: DistributedLockManager<S>,
    config: Arc<QueueConfig>,
}

impl<R, S> Clone for VirtualQueue<R, S>
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    fn clone(&self) -> Self {
        Self {
            repo: self.repo.clone(),
            locks: self.locks.clone(),
            config: self.config.clone(),
        }
    }
}

impl<R, S> VirtualQueue<R, S>
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    pub fn new(repo: Arc<R>, locks: DistributedLockManager<S>, config: Arc<QueueConfig>) -> Self {
        Self {
            repo,
            locks,
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Put `principal` at the back of the line.
    ///
    /// Fails with `QueueFull` at capacity, `AlreadyInQueue` for a live entry
    /// (the original timestamp is kept) and `FailedToEnqueue` when the lock
    /// is not acquired within its bounded wait.
    pub async fn add_to_queue(&self, principal: &PrincipalId) -> QueueResult<QueuePosition> {
        let outcome = self
            .locks
            .run_exclusive(&lock_key(principal), self.config.lock_timeout, move || {
                self.enqueue_locked(principal)
            })
            .await;

        match outcome {
            Some(result) => result,
            None => {
                tracing::warn!(principal_id = %principal, "Enqueue lock not acquired");
                Err(QueueError::FailedToEnqueue)
            }
        }
    }

    async fn enqueue_locked(&self, principal: &PrincipalId) -> QueueResult<QueuePosition> {
        let total_waiting = self.repo.total_waiting().await?;
        if total_waiting >= self.config.max_queue_size {
            tracing::warn!(
                principal_id = %principal,
                total_waiting,
                max_queue_size = self.config.max_queue_size,
                "Queue is full"
            );
            return Err(QueueError::QueueFull);
        }

        if let Some(rank) = self.repo.rank(principal).await? {
            tracing::warn!(principal_id = %principal, position = rank + 1, "Principal already in queue");
            return Err(QueueError::AlreadyInQueue);
        }

        let added = self
            .repo
            .insert(principal, Utc::now(), self.config.max_wait_time)
            .await?;
        if !added {
            tracing::warn!(principal_id = %principal, "Queue insert did not take");
            return Err(QueueError::FailedToEnqueue);
        }

        let position = self.get_position(principal).await?;
        tracing::info!(
            principal_id = %principal,
            position = position.position,
            total_waiting = position.total_waiting,
            "Added principal to queue"
        );
        Ok(position)
    }

    /// Lock-free read. Absence yields the sentinel, never an error.
    pub async fn get_position(&self, principal: &PrincipalId) -> QueueResult<QueuePosition> {
        let Some(rank) = self.repo.rank(principal).await? else {
            let total_waiting = self.repo.total_waiting().await?;
            return Ok(QueuePosition::not_queued(total_waiting));
        };

        let entered_at = self.repo.entered_at(principal).await?;
        // A concurrent removal can make the count lag behind the rank read
        let total_waiting = self.repo.total_waiting().await?.max(rank + 1);
        Ok(QueuePosition::queued(rank, total_waiting, entered_at))
    }

    /// Idempotent. Only an actual removal counts as one admission processed.
    pub async fn remove_from_queue(&self, principal: &PrincipalId) -> QueueResult<()> {
        if self.repo.remove(principal).await? {
            self.repo.record_processed().await?;
            tracing::debug!(principal_id = %principal, "Removed principal from queue");
        }
        Ok(())
    }

    pub async fn get_total_waiting(&self) -> QueueResult<u64> {
        self.repo.total_waiting().await
    }

    /// Inside the static processing window. The sentinel is never ready.
    pub fn is_ready_to_process(&self, position: &QueuePosition) -> bool {
        position.is_queued() && position.position <= self.config.processing_threshold
    }

    /// Enqueue and classify against the processing window.
    pub async fn admit(&self, principal: &PrincipalId) -> QueueResult<Admission> {
        let position = self.add_to_queue(principal).await?;
        if self.is_ready_to_process(&position) {
            Ok(Admission::Ready(position))
        } else {
            Ok(Admission::Waiting(position))
        }
    }

    /// Evict every entry older than `max_wait_time`. Returns how many went.
    pub async fn remove_timeout_users(&self) -> QueueResult<usize> {
        let max_wait = chrono::Duration::from_std(self.config.max_wait_time)
            .unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(max_wait)
            .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

        let stale = self.repo.entered_before(cutoff).await?;
        let mut removed = 0;
        for principal in &stale {
            if self.repo.remove(principal).await? {
                removed += 1;
                tracing::debug!(principal_id = %principal, "Swept timed-out principal");
            }
        }

        if removed > 0 {
            tracing::info!(removed, "Removed timed-out principals from queue");
        }
        Ok(removed)
    }

    /// Read-and-reset the admission counter and publish admissions/second.
    pub async fn update_processing_rate(&self) -> QueueResult<f64> {
        let processed = self.repo.take_processed().await?;
        let interval_secs = self.config.check_interval_secs();
        let rate = processed as f64 / interval_secs;

        self.repo.publish_processing_rate(rate).await?;
        tracing::debug!(
            processed,
            interval_secs,
            rate,
            "Updated processing rate"
        );
        Ok(rate)
    }

    /// Last published rate, 0 before the first recomputation.
    pub async fn processing_rate(&self) -> QueueResult<f64> {
        Ok(self.repo.processing_rate().await?.unwrap_or(0.0))
    }
}
