//! Application Configuration
//!
//! Configuration for the virtual queue and its maintenance jobs.

use std::time::Duration;

/// Virtual queue configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Hard admission ceiling
    pub max_queue_size: u64,
    /// Entries older than this are swept
    pub max_wait_time: Duration,
    /// Processing-rate recomputation cadence
    pub check_interval: Duration,
    /// Timeout sweep cadence
    pub sweep_interval: Duration,
    /// How many front-of-queue principals may proceed at once
    pub processing_threshold: u64,
    /// TTL of the per-principal enqueue lock
    pub lock_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 1000,
            max_wait_time: Duration::from_secs(30 * 60),
            check_interval: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(60),
            processing_threshold: 3,
            lock_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    pub fn with_max_queue_size(mut self, max_queue_size: u64) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn with_processing_threshold(mut self, threshold: u64) -> Self {
        self.processing_threshold = threshold;
        self
    }

    /// Recomputation interval in seconds, never zero
    pub fn check_interval_secs(&self) -> f64 {
        self.check_interval.as_secs_f64().max(0.001)
    }
}
