//! Handlers for the `/regional` resource.
//!
//! Submission returns as soon as the job is registered; tiles are shipped
//! to the broker in the background. Progress is polled through
//! `GET /regional/{job_id}`.

use analyst_core::error::CoreError;
use analyst_core::regional::RegionalAnalysis;
use analyst_core::tile::TileResult;
use analyst_core::types::JobId;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of a successful submission.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub job_id: JobId,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/regional
///
/// Register a regional analysis and queue its tiles for dispatch. Returns
/// 202 with the job id; 400 for an invalid definition, 503 when the
/// submission queue is full.
pub async fn submit_analysis(
    State(state): State<AppState>,
    payload: Result<Json<RegionalAnalysis>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Json(analysis) = payload?;
    let job_id = state.manager.submit(analysis).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmitResponse { job_id },
        }),
    ))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/regional
///
/// Status of every job still retained, oldest first.
pub async fn list_analyses(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let statuses = state.manager.list().await;
    Ok(Json(DataResponse { data: statuses }))
}

/// GET /api/v1/regional/{job_id}
///
/// Progress of one job. Unknown and evicted ids are 404.
pub async fn get_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let not_found = || CoreError::NotFound {
        entity: "Regional analysis",
        id: job_id.clone(),
    };
    let id: JobId = job_id.parse().map_err(|_| not_found())?;

    let status = state.manager.status(id).await?;
    Ok(Json(DataResponse { data: status }))
}

/// GET /api/v1/regional/results
///
/// `results` names the result sink, not a job; answer as for any unknown id.
pub async fn results_is_not_a_job() -> AppResult<StatusCode> {
    Err(CoreError::NotFound {
        entity: "Regional analysis",
        id: "results".to_string(),
    }
    .into())
}

// ---------------------------------------------------------------------------
// Local result sink
// ---------------------------------------------------------------------------

/// POST /api/v1/regional/results
///
/// Accept one tile result from a locally run worker and put it on the
/// in-process result queue. Only available in offline mode.
pub async fn post_result(
    State(state): State<AppState>,
    payload: Result<Json<TileResult>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let Some(queue) = &state.local_results else {
        return Err(AppError::NotFound(
            "The local result sink is only available in offline mode".to_string(),
        ));
    };
    let Json(result) = payload?;

    queue
        .push(&result)
        .map_err(|e| AppError::InternalError(format!("Failed to enqueue tile result: {e}")))?;

    tracing::debug!(job_id = %result.job_id, x = result.x, y = result.y, "Tile result received");
    Ok(StatusCode::ACCEPTED)
}
