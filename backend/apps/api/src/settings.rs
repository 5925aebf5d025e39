//! Process settings read from the environment

use admission::QueueConfig;
use platform::config::{env_minutes_or, env_or, env_string_or};
use platform::lock::LockConfig;
use platform::rate_limit::{RateLimitConfig, RateLimitStrategy};
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

/// Which store backs the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    /// Single process only
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown store backend '{other}', expected redis or memory")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub store_backend: StoreBackend,
    pub redis_url: String,
    pub principal_header: String,
    pub frontend_origins: String,
    pub queue: QueueConfig,
    pub lock: LockConfig,
    pub rate_limit: RateLimitConfig,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = QueueConfig::default();

        let queue = QueueConfig {
            max_queue_size: env_or("QUEUE_MAX_SIZE", defaults.max_queue_size)?,
            max_wait_time: env_minutes_or("QUEUE_MAX_WAIT_MINUTES", defaults.max_wait_time)?,
            check_interval: Duration::from_millis(env_or(
                "QUEUE_CHECK_INTERVAL_MS",
                defaults.check_interval.as_millis() as u64,
            )?),
            sweep_interval: Duration::from_secs(env_or(
                "QUEUE_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval.as_secs(),
            )?),
            processing_threshold: env_or(
                "QUEUE_PROCESSING_THRESHOLD",
                defaults.processing_threshold,
            )?,
            lock_timeout: Duration::from_secs(env_or(
                "QUEUE_LOCK_TIMEOUT_SECS",
                defaults.lock_timeout.as_secs(),
            )?),
        };

        let lock = LockConfig::new(env_or(
            "LOCK_ACQUIRE_TIMEOUT_SECS",
            LockConfig::default().acquire_timeout.as_secs(),
        )?);

        let rate_defaults = RateLimitConfig::default();
        let rate_limit = RateLimitConfig::new(
            env_or("RATE_LIMIT_REQUESTS", rate_defaults.max_requests)?,
            env_or("RATE_LIMIT_WINDOW_SECS", rate_defaults.window_secs())?,
        )
        .with_strategy(env_or::<RateLimitStrategy>(
            "RATE_LIMIT_STRATEGY",
            rate_defaults.strategy,
        )?);

        Ok(Self {
            bind_addr: env_or("BIND_ADDR", SocketAddr::from(([0, 0, 0, 0], 31113)))?,
            store_backend: env_or("STORE_BACKEND", StoreBackend::Redis)?,
            redis_url: env_string_or("REDIS_URL", "redis://127.0.0.1:6379"),
            principal_header: env_string_or(
                "PRINCIPAL_HEADER",
                admission::presentation::handlers::DEFAULT_PRINCIPAL_HEADER,
            ),
            frontend_origins: env_string_or(
                "FRONTEND_ORIGINS",
                "http://localhost:40922,http://127.0.0.1:40922",
            ),
            queue,
            lock,
            rate_limit,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_backend_parsing() {
        assert_eq!("Redis".parse::<StoreBackend>().unwrap(), StoreBackend::Redis);
        assert_eq!(" memory ".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("postgres".parse::<StoreBackend>().is_err());
    }
}
