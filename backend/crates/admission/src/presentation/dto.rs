//! API DTOs (Data Transfer Objects)

use crate::domain::entities::{Admission, QueuePosition};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdmissionStatus {
    Ready,
    Waiting,
}

/// Response for POST /api/queue/enter and GET /api/queue/status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuePositionResponse {
    pub status: AdmissionStatus,
    pub position: u64,
    pub total_waiting: u64,
    pub entered_at: Option<DateTime<Utc>>,
}

impl QueuePositionResponse {
    pub fn new(position: &QueuePosition, ready: bool) -> Self {
        Self {
            status: if ready {
                AdmissionStatus::Ready
            } else {
                AdmissionStatus::Waiting
            },
            position: position.position,
            total_waiting: position.total_waiting,
            entered_at: position.entered_at,
        }
    }
}

impl From<&Admission> for QueuePositionResponse {
    fn from(admission: &Admission) -> Self {
        Self::new(admission.position(), admission.is_ready())
    }
}

/// Response for GET /api/queue/stats
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatsResponse {
    pub total_waiting: u64,
    pub processing_rate: f64,
    pub processing_threshold: u64,
}
