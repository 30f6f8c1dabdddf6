//! Analysis endpoints: accept a staged file, report progress, and the
//! reserved vision stub.

use std::path::Path;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Deserialize;
use uuid::Uuid;

use pricedock_core::protocol::{
    AnalysisStatusResponse, AnalyzeAccepted, FileKind,
};

use crate::api::server::ApiState;
use crate::api::types::ApiError;
use crate::data::postgres::repositories::analyses::{create_analysis, get_analysis};
use crate::data::postgres::repositories::logs::recent_messages_by_kind;

/// Request body with `file_kind` kept raw so an unknown kind maps to 415
/// instead of a generic deserialization failure.
#[derive(Debug, Deserialize)]
pub struct AnalyzeFileBody {
    pub job_id: Uuid,
    pub supplier_id: Uuid,
    pub file_path: String,
    pub file_kind: String,
}

/// `POST /analyze/file` → 202 with the analysis id.
pub async fn analyze_file(
    State(state): State<ApiState>,
    Json(body): Json<AnalyzeFileBody>,
) -> Result<impl IntoResponse, ApiError> {
    let file_kind: FileKind = body
        .file_kind
        .parse()
        .map_err(|_| ApiError::unsupported_media(format!("unsupported kind '{}'", body.file_kind)))?;

    let path = Path::new(&body.file_path);
    if !path.is_absolute() {
        return Err(ApiError::bad_request(
            "InvalidRequest",
            "file_path must be absolute on the shared filesystem",
        ));
    }
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        ApiError::bad_request("InvalidRequest", format!("file not readable: {}", e))
    })?;
    if metadata.len() > state.max_file_size_bytes {
        return Err(ApiError::payload_too_large(format!(
            "file is {} bytes, cap is {}",
            metadata.len(),
            state.max_file_size_bytes
        )));
    }

    let supplier = state
        .suppliers
        .get(body.supplier_id)
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if supplier.is_none() {
        return Err(ApiError::bad_request(
            "InvalidRequest",
            format!("unknown supplier {}", body.supplier_id),
        ));
    }

    // Admission control: a bounded number of concurrent analyses; the
    // permit travels into the task and frees on completion.
    let permit = match Arc::clone(&state.analysis_slots).try_acquire_owned() {
        Ok(permit) => permit,
        Err(_) => {
            return Err(ApiError::service_unavailable(
                "analysis capacity exhausted, retry later",
            ));
        }
    };

    let analysis = create_analysis(
        &state.pool,
        body.job_id,
        body.supplier_id,
        &body.file_path,
        file_kind,
    )
    .await
    .map_err(ApiError::from_postgres)?;

    let analysis_id = analysis.id;
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        let _permit = permit;
        pipeline.run(analysis).await;
    });

    tracing::info!(
        analysis_id = %analysis_id,
        job_id = %body.job_id,
        supplier_id = %body.supplier_id,
        "Analysis accepted"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(AnalyzeAccepted { analysis_id }),
    ))
}

/// `GET /analyze/status/{analysis_id}`.
pub async fn analysis_status(
    State(state): State<ApiState>,
    UrlPath(analysis_id): UrlPath<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let analysis = get_analysis(&state.pool, analysis_id)
        .await
        .map_err(ApiError::from_postgres)?
        .ok_or_else(|| {
            ApiError::not_found("NotFound", format!("unknown analysis {}", analysis_id))
        })?;

    let recent_errors = recent_messages_by_kind(&state.pool, analysis_id, state.status_log_limit)
        .await
        .map_err(ApiError::from_postgres)?;

    let result = if analysis.phase.is_terminal() {
        analysis.result
    } else {
        None
    };

    Ok(Json(AnalysisStatusResponse {
        phase: analysis.phase,
        progress: analysis.progress,
        counters: analysis.counters,
        error_kind: analysis.error_kind,
        result,
        recent_errors,
    }))
}

/// `POST /analyze/vision` — reserved for image-based price lists.
pub async fn analyze_vision() -> ApiError {
    ApiError::not_implemented("image-based price lists are not supported yet")
}
