//! In-process store
//!
//! Mirrors the Redis semantics the admission core relies on: lazy TTL
//! expiry, rank ties broken by member, empty sorted sets disappear, and
//! `SET`/`GETSET` clear an existing TTL.

use super::{KeyValueStore, StoreError, StoreResult};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Single-process [`KeyValueStore`]. Clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

enum Value {
    Str(String),
    SortedSet(HashMap<String, f64>),
    /// Grant instants in epoch millis, oldest first
    Leases(VecDeque<i64>),
}

impl Entry {
    fn persistent(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn expiring(value: Value, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Some(Instant::now() + ttl),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys. Test helper.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries
            .values()
            .filter(|e| e.expires_at.is_none_or(|at| at > now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
    let now = Instant::now();
    if entries
        .get(key)
        .is_some_and(|e| e.expires_at.is_some_and(|at| at <= now))
    {
        entries.remove(key);
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::Corrupt {
        key: key.to_string(),
        reason: "WRONGTYPE operation against a key holding the wrong kind of value".to_string(),
    }
}

fn sorted_set<'a>(
    entries: &'a HashMap<String, Entry>,
    key: &str,
) -> StoreResult<Option<&'a HashMap<String, f64>>> {
    match entries.get(key).map(|e| &e.value) {
        None => Ok(None),
        Some(Value::SortedSet(set)) => Ok(Some(set)),
        Some(_) => Err(wrong_type(key)),
    }
}

fn string_value<'a>(entries: &'a HashMap<String, Entry>, key: &str) -> StoreResult<Option<&'a str>> {
    match entries.get(key).map(|e| &e.value) {
        None => Ok(None),
        Some(Value::Str(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(wrong_type(key)),
    }
}

/// Members ordered as Redis orders them: by score, then by member bytes.
fn ordered(set: &HashMap<String, f64>) -> Vec<(&str, f64)> {
    let mut members: Vec<(&str, f64)> = set.iter().map(|(m, s)| (m.as_str(), *s)).collect();
    members.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(b.0)));
    members
}

impl KeyValueStore for MemoryStore {
    async fn zadd(&self, key: &str, member: &str, score: f64) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::persistent(Value::SortedSet(HashMap::new())));
        match &mut entry.value {
            Value::SortedSet(set) => Ok(set.insert(member.to_string(), score).is_none()),
            _ => Err(wrong_type(key)),
        }
    }

    async fn zrank(&self, key: &str, member: &str) -> StoreResult<Option<u64>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let Some(set) = sorted_set(&entries, key)? else {
            return Ok(None);
        };
        Ok(ordered(set)
            .iter()
            .position(|(m, _)| *m == member)
            .map(|rank| rank as u64))
    }

    async fn zscore(&self, key: &str, member: &str) -> StoreResult<Option<f64>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        Ok(sorted_set(&entries, key)?.and_then(|set| set.get(member).copied()))
    }

    async fn zcard(&self, key: &str) -> StoreResult<u64> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        Ok(sorted_set(&entries, key)?.map_or(0, |set| set.len() as u64))
    }

    async fn zrem(&self, key: &str, member: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let (removed, now_empty) = match entries.get_mut(key).map(|e| &mut e.value) {
            None => return Ok(false),
            Some(Value::SortedSet(set)) => (set.remove(member).is_some(), set.is_empty()),
            Some(_) => return Err(wrong_type(key)),
        };
        if now_empty {
            entries.remove(key);
        }
        Ok(removed)
    }

    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> StoreResult<Vec<String>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let Some(set) = sorted_set(&entries, key)? else {
            return Ok(Vec::new());
        };
        Ok(ordered(set)
            .into_iter()
            .filter(|(_, score)| *score >= min && *score <= max)
            .map(|(m, _)| m.to_string())
            .collect())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        Ok(string_value(&entries, key)?.map(str::to_string))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry::persistent(Value::Str(value.to_string())),
        );
        Ok(())
    }

    async fn set_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<()> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            key.to_string(),
            Entry::expiring(Value::Str(value.to_string()), ttl),
        );
        Ok(())
    }

    async fn get_set(&self, key: &str, value: &str) -> StoreResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let previous = string_value(&entries, key)?.map(str::to_string);
        entries.insert(
            key.to_string(),
            Entry::persistent(Value::Str(value.to_string())),
        );
        Ok(previous)
    }

    async fn del(&self, key: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        Ok(entries.remove(key).is_some())
    }

    async fn expire(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + ttl);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let now = Instant::now();
        Ok(entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now)))
    }

    async fn incr(&self, key: &str) -> StoreResult<i64> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);
        increment(&mut entries, key)
    }

    async fn incr_with_ttl(&self, key: &str, ttl: Duration) -> StoreResult<i64> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let current = increment(&mut entries, key)?;
        if current == 1 {
            if let Some(entry) = entries.get_mut(key) {
                entry.expires_at = Some(Instant::now() + ttl);
            }
        }
        Ok(current)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl: Duration) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            Entry::expiring(Value::Str(value.to_string()), ttl),
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        if string_value(&entries, key)? == Some(expected) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn acquire_permits(
        &self,
        key: &str,
        permits: u32,
        capacity: u32,
        window: Duration,
    ) -> StoreResult<bool> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let now_ms = Utc::now().timestamp_millis();
        let entry = entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::persistent(Value::Leases(VecDeque::new())));
        let Value::Leases(leases) = &mut entry.value else {
            return Err(wrong_type(key));
        };

        let cutoff = lease_cutoff(now_ms, window);
        while leases.front().is_some_and(|&at| at <= cutoff) {
            leases.pop_front();
        }

        let granted = leases.len() + permits as usize <= capacity as usize;
        if granted {
            leases.extend(std::iter::repeat_n(now_ms, permits as usize));
        }
        let live = leases.len();
        entry.expires_at = Some(Instant::now() + window);
        if live == 0 {
            entries.remove(key);
        }
        Ok(granted)
    }

    async fn available_permits(
        &self,
        key: &str,
        capacity: u32,
        window: Duration,
    ) -> StoreResult<u64> {
        let mut entries = self.entries.lock().await;
        purge_expired(&mut entries, key);

        let cutoff = lease_cutoff(Utc::now().timestamp_millis(), window);
        match entries.get(key).map(|e| &e.value) {
            None => Ok(u64::from(capacity)),
            Some(Value::Leases(leases)) => {
                let live = leases.iter().filter(|&&at| at > cutoff).count() as u64;
                Ok(u64::from(capacity).saturating_sub(live))
            }
            Some(_) => Err(wrong_type(key)),
        }
    }
}

/// Leases granted at or before this instant have lapsed.
fn lease_cutoff(now_ms: i64, window: Duration) -> i64 {
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    now_ms.saturating_sub(window_ms)
}

fn increment(entries: &mut HashMap<String, Entry>, key: &str) -> StoreResult<i64> {
    let entry = entries
        .entry(key.to_string())
        .or_insert_with(|| Entry::persistent(Value::Str("0".to_string())));
    let Value::Str(raw) = &mut entry.value else {
        return Err(wrong_type(key));
    };
    let current: i64 = raw.parse().map_err(|_| StoreError::Corrupt {
        key: key.to_string(),
        reason: format!("value {raw:?} is not an integer"),
    })?;
    let next = current + 1;
    *raw = next.to_string();
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rank_orders_by_score_then_member() {
        let store = MemoryStore::new();
        store.zadd("q", "b", 10.0).await.unwrap();
        store.zadd("q", "a", 10.0).await.unwrap();
        store.zadd("q", "c", 5.0).await.unwrap();

        assert_eq!(store.zrank("q", "c").await.unwrap(), Some(0));
        assert_eq!(store.zrank("q", "a").await.unwrap(), Some(1));
        assert_eq!(store.zrank("q", "b").await.unwrap(), Some(2));
        assert_eq!(store.zrank("q", "zz").await.unwrap(), None);
        assert_eq!(store.zcard("q").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_zadd_existing_member_updates_score() {
        let store = MemoryStore::new();
        assert!(store.zadd("q", "a", 1.0).await.unwrap());
        assert!(!store.zadd("q", "a", 2.0).await.unwrap());
        assert_eq!(store.zscore("q", "a").await.unwrap(), Some(2.0));
    }

    #[tokio::test]
    async fn test_empty_set_disappears() {
        let store = MemoryStore::new();
        store.zadd("q", "a", 1.0).await.unwrap();
        assert!(store.zrem("q", "a").await.unwrap());
        assert!(!store.zrem("q", "a").await.unwrap());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_range_by_score_is_inclusive() {
        let store = MemoryStore::new();
        store.zadd("q", "a", 1.0).await.unwrap();
        store.zadd("q", "b", 2.0).await.unwrap();
        store.zadd("q", "c", 3.0).await.unwrap();

        let members = store.zrange_by_score("q", f64::NEG_INFINITY, 2.0).await.unwrap();
        assert_eq!(members, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let store = MemoryStore::new();
        store
            .set_ex("k", "v", Duration::from_millis(30))
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert!(store.ttl("k").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert_eq!(store.ttl("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_incr_with_ttl_sets_expiry_only_on_first_hit() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);
        assert_eq!(store.incr_with_ttl("c", ttl).await.unwrap(), 1);
        let first = store.ttl("c").await.unwrap().unwrap();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.incr_with_ttl("c", ttl).await.unwrap(), 2);
        let second = store.ttl("c").await.unwrap().unwrap();
        assert!(second < first);
    }

    #[tokio::test]
    async fn test_incr_on_text_is_corrupt() {
        let store = MemoryStore::new();
        store.set("c", "abc").await.unwrap();
        assert!(matches!(
            store.incr("c").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_get_set_returns_previous() {
        let store = MemoryStore::new();
        assert_eq!(store.get_set("n", "0").await.unwrap(), None);
        store.incr("n").await.unwrap();
        store.incr("n").await.unwrap();
        assert_eq!(store.get_set("n", "0").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("n").await.unwrap().as_deref(), Some("0"));
    }

    #[tokio::test]
    async fn test_set_nx_and_compare_and_delete() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(5);
        assert!(store.set_nx_ex("lock", "t1", ttl).await.unwrap());
        assert!(!store.set_nx_ex("lock", "t2", ttl).await.unwrap());

        assert!(!store.compare_and_delete("lock", "t2").await.unwrap());
        assert!(store.compare_and_delete("lock", "t1").await.unwrap());
        assert!(store.set_nx_ex("lock", "t2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_type_mismatch() {
        let store = MemoryStore::new();
        store.zadd("q", "a", 1.0).await.unwrap();
        assert!(matches!(
            store.get("q").await,
            Err(StoreError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn test_permit_bucket() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        assert_eq!(store.available_permits("b", 3, window).await.unwrap(), 3);
        for _ in 0..3 {
            assert!(store.acquire_permits("b", 1, 3, window).await.unwrap());
        }
        assert!(!store.acquire_permits("b", 1, 3, window).await.unwrap());
        assert_eq!(store.available_permits("b", 3, window).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_permits_do_not_trickle_back_within_window() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(400);

        for _ in 0..3 {
            assert!(store.acquire_permits("b", 1, 3, window).await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!store.acquire_permits("b", 1, 3, window).await.unwrap());
        assert_eq!(store.available_permits("b", 3, window).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(store.available_permits("b", 3, window).await.unwrap(), 3);
        assert!(store.acquire_permits("b", 1, 3, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_leases_lapse_one_by_one() {
        let store = MemoryStore::new();
        let window = Duration::from_millis(300);

        assert!(store.acquire_permits("b", 1, 2, window).await.unwrap());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(store.acquire_permits("b", 1, 2, window).await.unwrap());
        assert!(!store.acquire_permits("b", 1, 2, window).await.unwrap());

        // Only the first lease has lapsed
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(store.available_permits("b", 2, window).await.unwrap(), 1);
        assert!(store.acquire_permits("b", 1, 2, window).await.unwrap());
        assert!(!store.acquire_permits("b", 1, 2, window).await.unwrap());
    }

    #[tokio::test]
    async fn test_oversized_request_is_refused_whole() {
        let store = MemoryStore::new();
        let window = Duration::from_secs(60);

        assert!(store.acquire_permits("b", 2, 3, window).await.unwrap());
        assert!(!store.acquire_permits("b", 2, 3, window).await.unwrap());
        assert_eq!(store.available_permits("b", 3, window).await.unwrap(), 1);
    }
}
