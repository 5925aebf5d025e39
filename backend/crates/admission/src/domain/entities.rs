//! Domain Entities
//!
//! Views computed from the queue's ordered set on every read.

use chrono::{DateTime, Utc};

/// A principal's place in the waiting line.
///
/// `position` is 1-based. A principal that is not queued gets the sentinel
/// `position = 0` with no `entered_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuePosition {
    pub position: u64,
    pub total_waiting: u64,
    pub entered_at: Option<DateTime<Utc>>,
}

impl QueuePosition {
    pub const NOT_QUEUED: u64 = 0;

    pub fn queued(rank: u64, total_waiting: u64, entered_at: Option<DateTime<Utc>>) -> Self {
        Self {
            position: rank + 1,
            total_waiting,
            entered_at,
        }
    }

    pub fn not_queued(total_waiting: u64) -> Self {
        Self {
            position: Self::NOT_QUEUED,
            total_waiting,
            entered_at: None,
        }
    }

    pub fn is_queued(&self) -> bool {
        self.position != Self::NOT_QUEUED
    }
}

/// Outcome of an admission attempt
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Inside the processing window: proceed, then dequeue when done
    Ready(QueuePosition),
    /// Behind the processing window: poll the position
    Waiting(QueuePosition),
}

impl Admission {
    pub fn position(&self) -> &QueuePosition {
        match self {
            Admission::Ready(position) | Admission::Waiting(position) => position,
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Admission::Ready(_))
    }
}
