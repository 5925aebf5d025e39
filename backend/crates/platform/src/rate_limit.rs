//! Rate Limiting Infrastructure
//!
//! Per-principal attempt limiting over the shared store. Two strategies share
//! one contract and are chosen once from configuration:
//!
//! - **Fixed window**: an atomic counter whose TTL is set by the first hit of
//!   each window. Windows are wall-clock relative, so a burst straddling a
//!   window edge may see up to twice the limit.
//! - **Token bucket**: a permit lease log. Each admitted attempt holds one of
//!   `max_requests` permits for exactly one window, so any window-long
//!   interval admits at most `max_requests` attempts. Never blocks.

use crate::store::{SharedStore, StoreError, StoreResult};
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const FIXED_WINDOW_KEY_PREFIX: &str = "blackfriday:rate:order:";
const TOKEN_BUCKET_KEY_PREFIX: &str = "blackfriday:rate:bucket:";

/// Which limiter backs [`OrderRateLimiter`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitStrategy {
    #[default]
    FixedWindow,
    TokenBucket,
}

impl RateLimitStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedWindow => "fixed_window",
            Self::TokenBucket => "token_bucket",
        }
    }
}

impl fmt::Display for RateLimitStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RateLimitStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed_window" | "fixed-window" | "counter" => Ok(Self::FixedWindow),
            "token_bucket" | "token-bucket" | "bucket" => Ok(Self::TokenBucket),
            other => Err(format!(
                "unknown rate limit strategy '{other}', expected fixed_window or token_bucket"
            )),
        }
    }
}

/// Rate limit configuration
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in the window
    pub max_requests: u32,
    /// Time window duration
    pub window: Duration,
    pub strategy: RateLimitStrategy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
            strategy: RateLimitStrategy::default(),
        }
    }
}

impl RateLimitConfig {
    pub fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
            ..Default::default()
        }
    }

    pub fn with_strategy(mut self, strategy: RateLimitStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }
}

/// Snapshot used for `X-RateLimit-*` response headers
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitInfo {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
    pub window_size_secs: u64,
}

impl RateLimitInfo {
    pub fn reset_epoch_secs(&self) -> i64 {
        self.reset_at.timestamp()
    }
}

/// Per-principal attempt limiter
#[trait_variant::make(RateLimiter: Send)]
pub trait LocalRateLimiter {
    /// Record one attempt. `Ok(false)` means the principal is over its limit.
    async fn try_consume(&self, principal: &str) -> StoreResult<bool>;

    /// Current standing of `principal`, without consuming anything.
    async fn rate_limit_info(&self, principal: &str) -> StoreResult<RateLimitInfo>;
}

/// Counter strategy: `INCR` with the window TTL applied on the first hit
#[derive(Clone)]
pub struct FixedWindowRateLimiter<S>
where
    S: SharedStore,
{
    store: S,
    config: RateLimitConfig,
}

impl<S> FixedWindowRateLimiter<S>
where
    S: SharedStore,
{
    pub fn new(store: S, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn key(principal: &str) -> String {
        format!("{FIXED_WINDOW_KEY_PREFIX}{principal}")
    }
}

impl<S> RateLimiter for FixedWindowRateLimiter<S>
where
    S: SharedStore,
{
    async fn try_consume(&self, principal: &str) -> StoreResult<bool> {
        let count = self
            .store
            .incr_with_ttl(&Self::key(principal), self.config.window)
            .await?;
        Ok(count <= i64::from(self.config.max_requests))
    }

    async fn rate_limit_info(&self, principal: &str) -> StoreResult<RateLimitInfo> {
        let key = Self::key(principal);
        let count = match self.store.get(&key).await? {
            Some(raw) => raw.parse::<i64>().map_err(|e| StoreError::Corrupt {
                key: key.clone(),
                reason: e.to_string(),
            })?,
            None => 0,
        };
        // No live counter means nothing is pending a reset
        let ttl = self.store.ttl(&key).await?.unwrap_or(Duration::ZERO);

        let limit = self.config.max_requests;
        let remaining = (i64::from(limit) - count).clamp(0, i64::from(limit)) as u32;
        Ok(RateLimitInfo {
            limit,
            remaining,
            reset_at: after(ttl),
            window_size_secs: self.config.window_secs(),
        })
    }
}

/// Permit strategy: one leased permit per attempt
#[derive(Clone)]
pub struct TokenBucketRateLimiter<S>
where
    S: SharedStore,
{
    store: S,
    config: RateLimitConfig,
}

impl<S> TokenBucketRateLimiter<S>
where
    S: SharedStore,
{
    pub fn new(store: S, config: RateLimitConfig) -> Self {
        Self { store, config }
    }

    fn key(principal: &str) -> String {
        format!("{TOKEN_BUCKET_KEY_PREFIX}{principal}")
    }
}

impl<S> RateLimiter for TokenBucketRateLimiter<S>
where
    S: SharedStore,
{
    async fn try_consume(&self, principal: &str) -> StoreResult<bool> {
        self.store
            .acquire_permits(
                &Self::key(principal),
                1,
                self.config.max_requests,
                self.config.window,
            )
            .await
    }

    async fn rate_limit_info(&self, principal: &str) -> StoreResult<RateLimitInfo> {
        let available = self
            .store
            .available_permits(
                &Self::key(principal),
                self.config.max_requests,
                self.config.window,
            )
            .await?;

        let limit = self.config.max_requests;
        Ok(RateLimitInfo {
            limit,
            remaining: available.min(u64::from(limit)) as u32,
            reset_at: after(self.config.window),
            window_size_secs: self.config.window_secs(),
        })
    }
}

/// The configured limiter for the admission path
#[derive(Clone)]
pub enum OrderRateLimiter<S>
where
    S: SharedStore,
{
    FixedWindow(FixedWindowRateLimiter<S>),
    TokenBucket(TokenBucketRateLimiter<S>),
}

impl<S> OrderRateLimiter<S>
where
    S: SharedStore,
{
    pub fn from_config(store: S, config: RateLimitConfig) -> Self {
        tracing::info!(
            strategy = %config.strategy,
            max_requests = config.max_requests,
            window_secs = config.window_secs(),
            "Rate limiter configured"
        );
        match config.strategy {
            RateLimitStrategy::FixedWindow => {
                Self::FixedWindow(FixedWindowRateLimiter::new(store, config))
            }
            RateLimitStrategy::TokenBucket => {
                Self::TokenBucket(TokenBucketRateLimiter::new(store, config))
            }
        }
    }

    pub fn strategy(&self) -> RateLimitStrategy {
        match self {
            Self::FixedWindow(_) => RateLimitStrategy::FixedWindow,
            Self::TokenBucket(_) => RateLimitStrategy::TokenBucket,
        }
    }
}

impl<S> RateLimiter for OrderRateLimiter<S>
where
    S: SharedStore,
{
    async fn try_consume(&self, principal: &str) -> StoreResult<bool> {
        match self {
            Self::FixedWindow(limiter) => RateLimiter::try_consume(limiter, principal).await,
            Self::TokenBucket(limiter) => RateLimiter::try_consume(limiter, principal).await,
        }
    }

    async fn rate_limit_info(&self, principal: &str) -> StoreResult<RateLimitInfo> {
        match self {
            Self::FixedWindow(limiter) => RateLimiter::rate_limit_info(limiter, principal).await,
            Self::TokenBucket(limiter) => RateLimiter::rate_limit_info(limiter, principal).await,
        }
    }
}

fn after(delay: Duration) -> DateTime<Utc> {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
    Utc::now() + delay
}

#[cfg(test)]
mod tests {
    use super::{
        FixedWindowRateLimiter, OrderRateLimiter, RateLimitConfig, RateLimitInfo,
        RateLimitStrategy, RateLimiter,
    };
    use crate::store::{KeyValueStore, MemoryStore, StoreError};
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    fn limiter(strategy: RateLimitStrategy, max: u32, window: Duration) -> OrderRateLimiter<MemoryStore> {
        let config = RateLimitConfig {
            max_requests: max,
            window,
            strategy,
        };
        OrderRateLimiter::from_config(MemoryStore::new(), config)
    }

    async fn assert_boundary(strategy: RateLimitStrategy) {
        let limiter = limiter(strategy, 5, Duration::from_secs(1));

        for attempt in 1..=5 {
            assert!(
                limiter.try_consume("u").await.unwrap(),
                "{strategy}: attempt {attempt} should pass"
            );
        }
        assert!(!limiter.try_consume("u").await.unwrap(), "{strategy}: 6th rejected");

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(limiter.try_consume("u").await.unwrap(), "{strategy}: window reopened");
    }

    async fn assert_capped_within_window(strategy: RateLimitStrategy) {
        let limiter = limiter(strategy, 5, Duration::from_secs(1));

        for _ in 0..5 {
            assert!(limiter.try_consume("u").await.unwrap());
        }
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(
            !limiter.try_consume("u").await.unwrap(),
            "{strategy}: 6th attempt inside the window rejected"
        );
        assert_eq!(limiter.rate_limit_info("u").await.unwrap().remaining, 0);

        tokio::time::sleep(Duration::from_millis(900)).await;
        assert!(limiter.try_consume("u").await.unwrap(), "{strategy}: window reopened");
    }

    #[test]
    fn test_strategy_parsing() {
        assert_eq!(
            "fixed_window".parse::<RateLimitStrategy>().unwrap(),
            RateLimitStrategy::FixedWindow
        );
        assert_eq!(
            " Token_Bucket ".parse::<RateLimitStrategy>().unwrap(),
            RateLimitStrategy::TokenBucket
        );
        assert!("leaky".parse::<RateLimitStrategy>().is_err());
    }

    #[test]
    fn test_reset_epoch_secs() {
        let reset_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let info = RateLimitInfo {
            limit: 5,
            remaining: 0,
            reset_at,
            window_size_secs: 1,
        };
        assert_eq!(info.reset_epoch_secs(), 1_700_000_000);
    }

    #[tokio::test]
    async fn test_fixed_window_boundary() {
        assert_boundary(RateLimitStrategy::FixedWindow).await;
    }

    #[tokio::test]
    async fn test_token_bucket_boundary() {
        assert_boundary(RateLimitStrategy::TokenBucket).await;
    }

    #[tokio::test]
    async fn test_fixed_window_capped_after_partial_wait() {
        assert_capped_within_window(RateLimitStrategy::FixedWindow).await;
    }

    #[tokio::test]
    async fn test_token_bucket_capped_after_partial_wait() {
        assert_capped_within_window(RateLimitStrategy::TokenBucket).await;
    }

    #[tokio::test]
    async fn test_principals_are_independent() {
        for strategy in [RateLimitStrategy::FixedWindow, RateLimitStrategy::TokenBucket] {
            let limiter = limiter(strategy, 1, Duration::from_secs(60));
            assert!(limiter.try_consume("a").await.unwrap());
            assert!(!limiter.try_consume("a").await.unwrap());
            assert!(limiter.try_consume("b").await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_fixed_window_info() {
        let limiter = limiter(RateLimitStrategy::FixedWindow, 3, Duration::from_secs(60));

        let fresh = limiter.rate_limit_info("u").await.unwrap();
        assert_eq!(fresh.limit, 3);
        assert_eq!(fresh.remaining, 3);
        assert_eq!(fresh.window_size_secs, 60);

        for _ in 0..5 {
            limiter.try_consume("u").await.unwrap();
        }
        let exhausted = limiter.rate_limit_info("u").await.unwrap();
        assert_eq!(exhausted.remaining, 0);
        let until_reset = exhausted.reset_at - Utc::now();
        assert!(until_reset > chrono::Duration::seconds(50));
        assert!(until_reset <= chrono::Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_token_bucket_info() {
        let limiter = limiter(RateLimitStrategy::TokenBucket, 4, Duration::from_secs(60));

        assert_eq!(limiter.rate_limit_info("u").await.unwrap().remaining, 4);
        limiter.try_consume("u").await.unwrap();
        limiter.try_consume("u").await.unwrap();

        let info = limiter.rate_limit_info("u").await.unwrap();
        assert_eq!(info.limit, 4);
        assert_eq!(info.remaining, 2);
        assert!(info.reset_at > Utc::now());
    }

    #[tokio::test]
    async fn test_corrupt_counter_is_reported() {
        let store = MemoryStore::new();
        store
            .set("blackfriday:rate:order:u", "not-a-number")
            .await
            .unwrap();
        let limiter = FixedWindowRateLimiter::new(store, RateLimitConfig::new(5, 1));

        let err = tokio_test::assert_err!(limiter.rate_limit_info("u").await);
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }

    #[test]
    fn test_from_config_picks_strategy() {
        let store = MemoryStore::new();
        let config = RateLimitConfig::new(5, 1).with_strategy(RateLimitStrategy::TokenBucket);
        let limiter = OrderRateLimiter::from_config(store, config);
        assert_eq!(limiter.strategy(), RateLimitStrategy::TokenBucket);
    }
}
