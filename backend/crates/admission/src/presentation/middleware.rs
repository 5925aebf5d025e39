//! Rate Limit Middleware

use crate::domain::repository::QueueRepository;
use crate::error::QueueError;
use crate::presentation::handlers::{QueueAppState, extract_principal};
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use platform::rate_limit::{RateLimitInfo, RateLimiter};
use platform::store::SharedStore;

pub const HEADER_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const HEADER_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const HEADER_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Consume one attempt for the request's principal before the handler runs.
///
/// Store failures reject the request: the gate fails closed.
pub async fn rate_limit<R, S>(
    State(state): State<QueueAppState<R, S>>,
    req: Request,
    next: Next,
) -> Response
where
    R: QueueRepository + Send + Sync + 'static,
    S: SharedStore,
{
    let principal = match extract_principal(req.headers(), &state.principal_header) {
        Ok(principal) => principal,
        Err(e) => return e.into_response(),
    };

    match state.limiter.try_consume(principal.as_str()).await {
        Ok(true) => next.run(req).await,
        Ok(false) => {
            tracing::warn!(principal_id = %principal, "Rate limit exceeded");
            let mut response = QueueError::RateLimitExceeded.into_response();
            match state.limiter.rate_limit_info(principal.as_str()).await {
                Ok(info) => apply_headers(response.headers_mut(), &info),
                Err(e) => {
                    tracing::error!(principal_id = %principal, error = %e, "Rate limit info unavailable")
                }
            }
            response
        }
        Err(e) => QueueError::from(e).into_response(),
    }
}

fn apply_headers(headers: &mut HeaderMap, info: &RateLimitInfo) {
    headers.insert(HEADER_LIMIT, HeaderValue::from(info.limit));
    headers.insert(HEADER_REMAINING, HeaderValue::from(info.remaining));
    headers.insert(HEADER_RESET, HeaderValue::from(info.reset_epoch_secs()));
}
