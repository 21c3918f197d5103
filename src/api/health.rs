//! Liveness probe.

use axum::{Json, response::IntoResponse};
use serde::Serialize;

use crate::db::timestamp_to_datetime;
use crate::jwt::unix_now;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: &'static str,
}

/// GET /health - always answers while the process is serving requests.
pub async fn health() -> impl IntoResponse {
    let timestamp = unix_now().map(timestamp_to_datetime).unwrap_or_default();

    Json(HealthResponse {
        status: "ok",
        timestamp,
        version: env!("CARGO_PKG_VERSION"),
    })
}
