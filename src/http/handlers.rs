//! Request handlers for the limited endpoint and the admin API.

use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use tracing::info;

use super::router::AppState;
use crate::error::Result;
use crate::ratelimit::{BucketLimits, BucketSnapshot, ClientId};

/// The rate limited endpoint.
pub async fn ping() -> &'static str {
    "pong"
}

pub async fn health() -> &'static str {
    "ok"
}

/// Effective limits and live bucket state of a client.
#[derive(Debug, Serialize)]
pub struct ClientStatus {
    pub client_id: String,
    pub limits: BucketLimits,
    pub has_override: bool,
    pub bucket: Option<BucketSnapshot>,
}

/// `GET /clients/{id}`
pub async fn get_client(
    State(state): State<AppState>,
    path: std::result::Result<Path<String>, PathRejection>,
) -> Result<Json<ClientStatus>> {
    let Path(id) = path?;
    let client_id = ClientId::new(id)?;
    let limiter = &state.limiter;

    Ok(Json(ClientStatus {
        limits: limiter.limits_for(client_id.as_str()),
        has_override: limiter.has_override(client_id.as_str()),
        bucket: limiter.snapshot(client_id.as_str()),
        client_id: client_id.to_string(),
    }))
}

/// `PUT /clients/{id}`: set per-client limits.
pub async fn put_client(
    State(state): State<AppState>,
    path: std::result::Result<Path<String>, PathRejection>,
    body: std::result::Result<Json<BucketLimits>, JsonRejection>,
) -> Result<StatusCode> {
    let Path(id) = path?;
    let Json(limits) = body?;
    state.limiter.set_override(&id, limits)?;
    info!(
        client_id = %id,
        capacity = limits.capacity,
        refill_rate_per_second = limits.refill_rate_per_second,
        "Client limits updated"
    );
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /clients/{id}`: drop per-client limits and bucket state.
pub async fn delete_client(
    State(state): State<AppState>,
    path: std::result::Result<Path<String>, PathRejection>,
) -> Result<StatusCode> {
    let Path(id) = path?;
    let client_id = ClientId::new(id)?;
    let had_override = state.limiter.remove_override(client_id.as_str());
    info!(client_id = %client_id, had_override = had_override, "Client removed");
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /clients/{id}/reset`: refill the client's bucket.
pub async fn reset_client(
    State(state): State<AppState>,
    path: std::result::Result<Path<String>, PathRejection>,
) -> Result<StatusCode> {
    let Path(id) = path?;
    state.limiter.reset(&id)?;
    info!(client_id = %id, "Client bucket reset");
    Ok(StatusCode::NO_CONTENT)
}
