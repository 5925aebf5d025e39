//! HTTP Handlers

use crate::application::virtual_queue::VirtualQueue;
use crate::domain::repository::QueueRepository;
use crate::domain::value_objects::PrincipalId;
use crate::error::{QueueError, QueueResult};
use crate::presentation::dto::{QueuePositionResponse, QueueStatsResponse};
use axum::Json;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, StatusCode};
use axum::response::IntoResponse;
use platform::rate_limit::OrderRateLimiter;
use platform::store::SharedStore;
use std::sync::Arc;

/// Default trusted header carrying the authenticated principal
pub const DEFAULT_PRINCIPAL_HEADER: &str = "x-principal-id";

/// Shared state for queue handlers
pub struct QueueAppState<R, S>
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    pub queue: VirtualQueue<R, S>,
    pub limiter: Arc<OrderRateLimiter<S>>,
    pub principal_header: HeaderName,
}

impl<R, S> Clone for QueueAppState<R, S>
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            limiter: self.limiter.clone(),
            principal_header: self.principal_header.clone(),
        }
    }
}

/// Read the principal set by the upstream authentication layer
pub fn extract_principal(headers: &HeaderMap, header: &HeaderName) -> QueueResult<PrincipalId> {
    let raw = headers
        .get(header)
        .ok_or(QueueError::MissingPrincipal)?
        .to_str()
        .map_err(|_| QueueError::InvalidPrincipal("not visible ASCII".to_string()))?;
    PrincipalId::parse(raw)
}

/// POST /api/queue/enter
pub async fn enter<R, S>(
    State(state): State<QueueAppState<R, S>>,
    headers: HeaderMap,
) -> QueueResult<impl IntoResponse>
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    let principal = extract_principal(&headers, &state.principal_header)?;
    let admission = state.queue.admit(&principal).await?;

    let status = if admission.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::ACCEPTED
    };
    Ok((status, Json(QueuePositionResponse::from(&admission))))
}

/// GET /api/queue/status
pub async fn status<R, S>(
    State(state): State<QueueAppState<R, S>>,
    headers: HeaderMap,
) -> QueueResult<Json<QueuePositionResponse>>
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    let principal = extract_principal(&headers, &state.principal_header)?;
    let position = state.queue.get_position(&principal).await?;

    if !position.is_queued() {
        return Err(QueueError::PositionNotFound);
    }

    let ready = state.queue.is_ready_to_process(&position);
    Ok(Json(QueuePositionResponse::new(&position, ready)))
}

/// DELETE /api/queue
pub async fn leave<R, S>(
    State(state): State<QueueAppState<R, S>>,
    headers: HeaderMap,
) -> QueueResult<StatusCode>
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    let principal = extract_principal(&headers, &state.principal_header)?;
    state.queue.remove_from_queue(&principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/queue/stats
pub async fn stats<R, S>(
    State(state): State<QueueAppState<R, S>>,
) -> QueueResult<Json<QueueStatsResponse>>
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    let total_waiting = state.queue.get_total_waiting().await?;
    let processing_rate = state.queue.processing_rate().await?;

    Ok(Json(QueueStatsResponse {
        total_waiting,
        processing_rate,
        processing_threshold: state.queue.config().processing_threshold,
    }))
}
