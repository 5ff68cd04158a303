use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use crate::app_state::AppState;
use crate::models::job::JobId;
use crate::models::status::JobStatusResponse;

/// GET /api/v1/jobs/{job_id}: where a job currently sits in the shared folder.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<JobStatusResponse>, StatusCode> {
    let job_id = JobId::parse(&raw_id).ok_or(StatusCode::BAD_REQUEST)?;

    let (status, result) = state.queue.locate(&job_id).await.map_err(|e| {
        tracing::error!(job_id = %job_id, error = %e, "Failed to locate job");
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    Ok(Json(JobStatusResponse {
        job_id,
        status,
        result,
    }))
}
