//! Axum router setup.

use std::sync::Arc;

use axum::body::Body;
use axum::http::Request;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info_span;
use uuid::Uuid;

use super::extract::RequestPolicy;
use super::handlers;
use super::middleware::rate_limit;
use crate::config::HttpConfig;
use crate::error::Result;
use crate::ratelimit::RateLimiter;

/// State shared by every request handler.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide rate limiter
    pub limiter: Arc<RateLimiter>,
    /// How requests map to clients and costs
    pub policy: Arc<RequestPolicy>,
}

impl AppState {
    pub fn new(limiter: Arc<RateLimiter>, config: &HttpConfig) -> Result<Self> {
        Ok(Self {
            limiter,
            policy: Arc::new(RequestPolicy::from_config(config)?),
        })
    }
}

/// Build the router: the rate limited `/ping` endpoint plus the admin API.
pub fn build_router(state: AppState) -> Router {
    let limited = Router::new()
        .route("/ping", get(handlers::ping))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    let admin = Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/clients/{id}",
            get(handlers::get_client)
                .put(handlers::put_client)
                .delete(handlers::delete_client),
        )
        .route("/clients/{id}/reset", post(handlers::reset_client));

    Router::new()
        .merge(limited)
        .merge(admin)
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
                info_span!(
                    "request",
                    method = %request.method(),
                    path = %request.uri().path(),
                    request_id = %Uuid::new_v4(),
                )
            }),
        )
        .with_state(state)
}
