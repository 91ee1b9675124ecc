//! Rate limiting middleware.

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use tracing::warn;

use super::router::AppState;
use crate::error::PinglimitError;
use crate::ratelimit::Decision;

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Admit or reject a request before it reaches the handler.
///
/// Admitted requests get `X-RateLimit-Limit` and `X-RateLimit-Remaining`
/// headers; rejected ones get 429 with `Retry-After` when a retry can succeed.
pub async fn rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, PinglimitError> {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);

    let (client_id, cost) = state
        .policy
        .client_id(request.headers(), peer)
        .and_then(|id| state.policy.cost(request.headers()).map(|cost| (id, cost)))
        .inspect_err(|e| warn!(error = %e, "Rejecting malformed request"))?;

    match state.limiter.check_and_consume(client_id.as_str(), cost)? {
        Decision::Admit { remaining, limit } => {
            let mut response = next.run(request).await;
            let headers = response.headers_mut();
            headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(limit as u64));
            headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(remaining as u64));
            Ok(response)
        }
        Decision::Reject { retry_after, limit } => Ok(too_many_requests(limit, retry_after)),
    }
}

fn too_many_requests(capacity: f64, retry_after: Option<Duration>) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "too many requests" })),
    )
        .into_response();

    let headers = response.headers_mut();
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(capacity as u64));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(0u64));
    if let Some(retry_after) = retry_after {
        headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs(retry_after)));
    }
    response
}

/// Whole seconds to wait, rounded up and never zero.
fn retry_after_secs(retry_after: Duration) -> u64 {
    (retry_after.as_secs_f64().ceil() as u64).max(1)
}
