//! Queue Router

use crate::application::virtual_queue::VirtualQueue;
use crate::domain::repository::QueueRepository;
use crate::presentation::handlers::{self, QueueAppState};
use crate::presentation::middleware;
use axum::http::HeaderName;
use axum::{
    Router,
    routing::{delete, get, post},
};
use platform::rate_limit::OrderRateLimiter;
use platform::store::SharedStore;
use std::sync::Arc;

/// Create the queue router, to be nested under `/api/queue`
pub fn queue_router<R, S>(
    queue: VirtualQueue<R, S>,
    limiter: OrderRateLimiter<S>,
    principal_header: HeaderName,
) -> Router
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    let state = QueueAppState {
        queue,
        limiter: Arc::new(limiter),
        principal_header,
    };

    let enter = post(handlers::enter::<R, S>).route_layer(axum::middleware::from_fn_with_state(
        state.clone(),
        middleware::rate_limit::<R, S>,
    ));

    Router::new()
        .route("/enter", enter)
        .route("/status", get(handlers::status::<R, S>))
        .route("/stats", get(handlers::stats::<R, S>))
        .route("/", delete(handlers::leave::<R, S>))
        .with_state(state)
}
