//! Store-backed Queue Repository
//!
//! Key layout:
//! - `blackfriday:order:queue` - ordered set, member = principal, score = entry epoch ms
//! - `blackfriday:order:queue:expire:{principal}` - expiry marker, value = entry epoch ms
//! - `blackfriday:order:queue:processing_count` - admissions since the last recomputation
//! - `blackfriday:order:queue:processing_rate` - last published admissions/second

use crate::domain::repository::QueueRepository;
use crate::domain::value_objects::PrincipalId;
use crate::error::{QueueError, QueueResult};
use chrono::{DateTime, Utc};
use platform::store::{SharedStore, StoreError};
use std::time::Duration;

pub const QUEUE_KEY: &str = "blackfriday:order:queue";
pub const PROCESSING_COUNT_KEY: &str = "blackfriday:order:queue:processing_count";
pub const PROCESSING_RATE_KEY: &str = "blackfriday:order:queue:processing_rate";
const EXPIRE_KEY_PREFIX: &str = "blackfriday:order:queue:expire:";
const LOCK_KEY_PREFIX: &str = "lock:blackfriday:order:queue:";

pub fn expire_key(principal: &str) -> String {
    format!("{EXPIRE_KEY_PREFIX}{principal}")
}

/// Lock serializing enqueue attempts of one principal
pub fn lock_key(principal: &PrincipalId) -> String {
    format!("{LOCK_KEY_PREFIX}{principal}")
}

/// [`QueueRepository`] over any [`SharedStore`]
#[derive(Clone)]
pub struct StoreQueueRepository<S>
where
    S: SharedStore,
{
    store: S,
}

impl<S> StoreQueueRepository<S>
where
    S: SharedStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    async fn remove_member(&self, member: &str) -> QueueResult<bool> {
        let removed = self.store.zrem(QUEUE_KEY, member).await?;
        // The marker is not authoritative and lapses on its own
        if let Err(e) = self.store.del(&expire_key(member)).await {
            tracing::warn!(principal_id = %member, error = %e, "Failed to delete expiry marker");
        }
        Ok(removed)
    }
}

fn to_datetime(score: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(score as i64)
}

fn parse_number<T>(key: &str, raw: &str) -> QueueResult<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        QueueError::Store(StoreError::Corrupt {
            key: key.to_string(),
            reason: e.to_string(),
        })
    })
}

impl<S> QueueRepository for StoreQueueRepository<S>
where
    S: SharedStore,
{
    async fn insert(
        &self,
        principal: &PrincipalId,
        entered_at: DateTime<Utc>,
        max_wait: Duration,
    ) -> QueueResult<bool> {
        let millis = entered_at.timestamp_millis();
        let added = self
            .store
            .zadd(QUEUE_KEY, principal.as_str(), millis as f64)
            .await?;
        if !added {
            return Ok(false);
        }
        // An abandoned queue cleans itself up
        self.store.expire(QUEUE_KEY, max_wait).await?;
        self.store
            .set_ex(&expire_key(principal.as_str()), &millis.to_string(), max_wait)
            .await?;
        Ok(true)
    }

    async fn rank(&self, principal: &PrincipalId) -> QueueResult<Option<u64>> {
        Ok(self.store.zrank(QUEUE_KEY, principal.as_str()).await?)
    }

    async fn entered_at(&self, principal: &PrincipalId) -> QueueResult<Option<DateTime<Utc>>> {
        let score = self.store.zscore(QUEUE_KEY, principal.as_str()).await?;
        Ok(score.and_then(to_datetime))
    }

    async fn total_waiting(&self) -> QueueResult<u64> {
        Ok(self.store.zcard(QUEUE_KEY).await?)
    }

    async fn remove(&self, principal: &PrincipalId) -> QueueResult<bool> {
        self.remove_member(principal.as_str()).await
    }

    async fn entered_before(&self, cutoff: DateTime<Utc>) -> QueueResult<Vec<PrincipalId>> {
        let members = self
            .store
            .zrange_by_score(QUEUE_KEY, f64::NEG_INFINITY, cutoff.timestamp_millis() as f64)
            .await?;

        let mut principals = Vec::with_capacity(members.len());
        for member in members {
            match PrincipalId::parse(&member) {
                Ok(principal) => principals.push(principal),
                Err(e) => {
                    // Not written by this service; drop it so it cannot hold a slot
                    tracing::warn!(member = %member, error = %e, "Dropping unparseable queue member");
                    self.remove_member(&member).await?;
                }
            }
        }
        Ok(principals)
    }

    async fn record_processed(&self) -> QueueResult<()> {
        self.store.incr(PROCESSING_COUNT_KEY).await?;
        Ok(())
    }

    async fn take_processed(&self) -> QueueResult<u64> {
        let previous = self.store.get_set(PROCESSING_COUNT_KEY, "0").await?;
        match previous {
            Some(raw) => Ok(parse_number::<i64>(PROCESSING_COUNT_KEY, &raw)?.max(0) as u64),
            None => Ok(0),
        }
    }

    async fn publish_processing_rate(&self, rate: f64) -> QueueResult<()> {
        self.store
            .set(PROCESSING_RATE_KEY, &rate.to_string())
            .await?;
        Ok(())
    }

    async fn processing_rate(&self) -> QueueResult<Option<f64>> {
        match self.store.get(PROCESSING_RATE_KEY).await? {
            Some(raw) => Ok(Some(parse_number(PROCESSING_RATE_KEY, &raw)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use platform::store::{KeyValueStore, MemoryStore};

    fn principal(id: &str) -> PrincipalId {
        PrincipalId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn test_insert_writes_marker_and_queue_ttl() {
        let store = MemoryStore::new();
        let repo = StoreQueueRepository::new(store.clone());
        let at = DateTime::from_timestamp_millis(1_700_000_000_123).unwrap();

        assert!(repo.insert(&principal("a"), at, Duration::from_secs(60)).await.unwrap());

        assert_eq!(
            store.get(&expire_key("a")).await.unwrap().as_deref(),
            Some("1700000000123")
        );
        assert!(store.ttl(QUEUE_KEY).await.unwrap().is_some());
        assert_eq!(repo.entered_at(&principal("a")).await.unwrap(), Some(at));
    }

    #[tokio::test]
    async fn test_remove_deletes_marker() {
        let store = MemoryStore::new();
        let repo = StoreQueueRepository::new(store.clone());
        repo.insert(&principal("a"), Utc::now(), Duration::from_secs(60))
            .await
            .unwrap();

        assert!(repo.remove(&principal("a")).await.unwrap());
        assert!(!repo.remove(&principal("a")).await.unwrap());
        assert_eq!(store.get(&expire_key("a")).await.unwrap(), None);
        assert_eq!(repo.total_waiting().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_take_processed_resets_counter() {
        let repo = StoreQueueRepository::new(MemoryStore::new());
        assert_eq!(repo.take_processed().await.unwrap(), 0);

        for _ in 0..3 {
            repo.record_processed().await.unwrap();
        }
        assert_eq!(repo.take_processed().await.unwrap(), 3);
        assert_eq!(repo.take_processed().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_processing_rate_roundtrip() {
        let repo = StoreQueueRepository::new(MemoryStore::new());
        assert_eq!(repo.processing_rate().await.unwrap(), None);

        repo.publish_processing_rate(0.5).await.unwrap();
        assert_eq!(repo.processing_rate().await.unwrap(), Some(0.5));
    }

    #[tokio::test]
    async fn test_corrupt_counter_surfaces_as_store_error() {
        let store = MemoryStore::new();
        store.set(PROCESSING_COUNT_KEY, "lots").await.unwrap();
        let repo = StoreQueueRepository::new(store);

        let err = repo.take_processed().await.unwrap_err();
        assert!(matches!(err, QueueError::Store(StoreError::Corrupt { .. })));
    }

    #[tokio::test]
    async fn test_entered_before_drops_foreign_members() {
        let store = MemoryStore::new();
        store.zadd(QUEUE_KEY, "   ", 1.0).await.unwrap();
        store.zadd(QUEUE_KEY, "a", 2.0).await.unwrap();
        let repo = StoreQueueRepository::new(store.clone());

        let cutoff = DateTime::from_timestamp_millis(10).unwrap();
        let stale = repo.entered_before(cutoff).await.unwrap();

        assert_eq!(stale, vec![principal("a")]);
        assert_eq!(store.zcard(QUEUE_KEY).await.unwrap(), 1);
    }
}
