//! Distributed Lock Manager
//!
//! Named, TTL-bounded mutual exclusion over the shared store.
//!
//! - Acquisition writes a random holder token with `SET NX PX`, polling until
//!   the configured wait bound elapses.
//! - Release is a compare-and-delete on that token, so a lock that expired and
//!   was taken by another holder is never released by the previous one.
//! - The TTL is the liveness net: a holder that dies mid-section cannot wedge
//!   the key forever.

use crate::crypto::random_token;
use crate::store::SharedStore;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Lock acquisition policy
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How long `acquire_lock` waits for a contended key
    pub acquire_timeout: Duration,
    /// Pause between acquisition attempts
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(30),
            retry_interval: Duration::from_millis(50),
        }
    }
}

impl LockConfig {
    pub fn new(acquire_timeout_secs: u64) -> Self {
        Self {
            acquire_timeout: Duration::from_secs(acquire_timeout_secs),
            ..Default::default()
        }
    }
}

/// Acquires and releases store-resident locks
#[derive(Clone)]
pub struct DistributedLockManager<S>
where
    S: SharedStore,
{
    store: S,
    config: LockConfig,
}

impl<S> DistributedLockManager<S>
where
    S: SharedStore,
{
    pub fn new(store: S, config: LockConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Try to take `key` for `ttl`, waiting at most `acquire_timeout`.
    ///
    /// `None` means "not acquired": either contention outlasted the wait or
    /// the store failed. Store failures are logged, not returned.
    pub async fn acquire_lock(&self, key: &str, ttl: Duration) -> Option<LockGuard<S>> {
        let token = random_token();
        let deadline = Instant::now() + self.config.acquire_timeout;

        loop {
            match self.store.set_nx_ex(key, &token, ttl).await {
                Ok(true) => {
                    tracing::debug!(lock_key = %key, "Lock acquired");
                    return Some(LockGuard {
                        store: self.store.clone(),
                        key: key.to_string(),
                        token,
                        released: false,
                    });
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::error!(lock_key = %key, error = %e, "Error acquiring lock");
                    return None;
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(lock_key = %key, "Failed to acquire distributed lock");
                return None;
            }
            tokio::time::sleep(self.config.retry_interval.min(deadline - now)).await;
        }
    }

    /// Run `critical` while holding `key`.
    ///
    /// Returns `None` without running `critical` when the lock is not
    /// acquired. Once acquired, the lock is released exactly once whether the
    /// section returns `Ok` or `Err`.
    pub async fn run_exclusive<T, F, Fut>(&self, key: &str, ttl: Duration, critical: F) -> Option<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.acquire_lock(key, ttl).await?;
        let output = critical().await;
        guard.release().await;
        Some(output)
    }
}

/// A held lock.
///
/// Call [`LockGuard::release`] when the section ends. A guard dropped without
/// release (panic, cancelled future) releases from a spawned task instead.
#[must_use = "a lock guard must be released"]
pub struct LockGuard<S>
where
    S: SharedStore,
{
    store: S,
    key: String,
    token: String,
    released: bool,
}

impl<S> LockGuard<S>
where
    S: SharedStore,
{
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Release the lock if this guard still holds it. Never fails.
    pub async fn release(mut self) {
        self.released = true;
        release_token(&self.store, &self.key, &self.token).await;
    }
}

impl<S> Drop for LockGuard<S>
where
    S: SharedStore,
{
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(lock_key = %self.key, "Lock dropped outside runtime; left to expire");
            return;
        };
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            release_token(&store, &key, &token).await;
        });
    }
}

async fn release_token<S>(store: &S, key: &str, token: &str)
where
    S: SharedStore,
{
    match store.compare_and_delete(key, token).await {
        Ok(true) => tracing::debug!(lock_key = %key, "Lock released"),
        Ok(false) => {
            tracing::warn!(lock_key = %key, "Lock expired before release; not released")
        }
        Err(e) => {
            tracing::error!(lock_key = %key, error = %e, "Error releasing distributed lock")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn manager(store: &MemoryStore, wait_ms: u64) -> DistributedLockManager<MemoryStore> {
        DistributedLockManager::new(
            store.clone(),
            LockConfig {
                acquire_timeout: Duration::from_millis(wait_ms),
                retry_interval: Duration::from_millis(5),
            },
        )
    }

    #[tokio::test]
    async fn test_second_acquire_times_out() {
        let store = MemoryStore::new();
        let locks = manager(&store, 30);

        let first = locks.acquire_lock("lock:a", Duration::from_secs(5)).await;
        assert!(first.is_some());

        let started = std::time::Instant::now();
        let second = locks.acquire_lock("lock:a", Duration::from_secs(5)).await;
        assert!(second.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));

        first.unwrap().release().await;
    }

    #[tokio::test]
    async fn test_release_allows_reacquire() {
        let store = MemoryStore::new();
        let locks = manager(&store, 10);

        let guard = locks
            .acquire_lock("lock:a", Duration::from_secs(5))
            .await
            .unwrap();
        guard.release().await;
        assert_eq!(store.get("lock:a").await.unwrap(), None);

        assert!(
            locks
                .acquire_lock("lock:a", Duration::from_secs(5))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_waiter_gets_lock_after_release() {
        let store = MemoryStore::new();
        let locks = manager(&store, 1_000);

        let guard = locks
            .acquire_lock("lock:a", Duration::from_secs(5))
            .await
            .unwrap();
        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.acquire_lock("lock:a", Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        guard.release().await;

        let acquired = waiter.await.unwrap();
        assert!(acquired.is_some());
    }

    #[tokio::test]
    async fn test_expired_lock_is_not_stolen_back() {
        let store = MemoryStore::new();
        let locks = manager(&store, 10);

        let stale = locks
            .acquire_lock("lock:a", Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let fresh = locks
            .acquire_lock("lock:a", Duration::from_secs(5))
            .await
            .unwrap();
        stale.release().await;

        assert_eq!(
            store.get("lock:a").await.unwrap().as_deref(),
            Some(fresh.token())
        );
        fresh.release().await;
    }

    #[tokio::test]
    async fn test_dropped_guard_is_released() {
        let store = MemoryStore::new();
        let locks = manager(&store, 10);

        {
            let _guard = locks.acquire_lock("lock:a", Duration::from_secs(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.get("lock:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_exclusive_releases_on_error() {
        let store = MemoryStore::new();
        let locks = manager(&store, 10);

        let out: Option<Result<(), &str>> = locks
            .run_exclusive("lock:a", Duration::from_secs(5), || async { Err("boom") })
            .await;
        assert_eq!(out, Some(Err("boom")));
        assert_eq!(store.get("lock:a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_run_exclusive_skips_section_when_contended() {
        let store = MemoryStore::new();
        let locks = manager(&store, 10);
        let ran = AtomicUsize::new(0);
        let ran_ref = &ran;

        let held = locks
            .acquire_lock("lock:a", Duration::from_secs(5))
            .await
            .unwrap();
        let out = locks
            .run_exclusive("lock:a", Duration::from_secs(5), || async move {
                ran_ref.fetch_add(1, Ordering::SeqCst);
            })
            .await;
        assert!(out.is_none());
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        held.release().await;
    }

    #[tokio::test]
    async fn test_mutual_exclusion_no_lost_updates() {
        let store = MemoryStore::new();
        let locks = Arc::new(manager(&store, 5_000));
        store.set("counter", "0").await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let locks = locks.clone();
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let store = &store;
                locks
                    .run_exclusive("lock:counter", Duration::from_secs(5), || async move {
                        // read-modify-write with a yield in between
                        let current: i64 = store
                            .get("counter")
                            .await
                            .unwrap()
                            .unwrap()
                            .parse()
                            .unwrap();
                        tokio::task::yield_now().await;
                        store.set("counter", &(current + 1).to_string()).await.unwrap();
                    })
                    .await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().is_some());
        }
        assert_eq!(store.get("counter").await.unwrap().as_deref(), Some("16"));
    }
}
