//! Health check endpoint

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;

use pricedock_core::protocol::HealthResponse;

use crate::api::server::ApiState;
use crate::data::postgres::{ping, vector_ready};

/// `GET /health`: per-dependency readiness. The service keeps answering
/// even when a dependency is down so the courier can tell "degraded"
/// from "gone".
pub async fn health(State(state): State<ApiState>) -> impl IntoResponse {
    let (db, vector, llm) = tokio::join!(
        ping(&state.pool),
        vector_ready(&state.pool),
        state.llm.probe(),
    );

    let body = HealthResponse {
        ok: db && llm && vector,
        db,
        llm,
        vector,
    };
    let status = if body.ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
