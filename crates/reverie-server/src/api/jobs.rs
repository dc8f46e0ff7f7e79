//! Job submission and polling endpoints

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::info;

use crate::api::enforce_rate_limit;
use crate::error::ApiError;
use crate::state::AppState;
use reverie_core::{Job, JobPayload, VideoJobParams};

const MAX_SCRIPT_CHARS: usize = 5000;

/// Enqueue an avatar video render. Returns 202 with the job id; the
/// client polls `/jobs/:id` or subscribes to `/events`.
pub async fn submit_video(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(params): Json<VideoJobParams>,
) -> Result<impl IntoResponse, ApiError> {
    let quota = enforce_rate_limit(&state, &headers, &peer, "/jobs/video")?;

    if params.script.trim().is_empty() {
        return Err(ApiError::bad_request("script must not be empty"));
    }
    if params.script.chars().count() > MAX_SCRIPT_CHARS {
        return Err(ApiError::bad_request(format!(
            "script exceeds {MAX_SCRIPT_CHARS} characters"
        )));
    }

    let job_id = state.queue.submit(JobPayload::Video(params)).await?;
    info!(job_id, "video job accepted");

    Ok((
        StatusCode::ACCEPTED,
        quota.headers(),
        Json(json!({ "job_id": job_id, "status": "queued" })),
    ))
}

/// Current status of a job.
pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job = state.queue.get_or_err(&job_id).await?;
    Ok(Json(job))
}
