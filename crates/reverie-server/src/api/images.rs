//! Image generation and editing endpoints
//!
//! Generation is asynchronous through the job queue unless the
//! fingerprint is already cached, in which case the artifact comes
//! back inline. Face swap and upscaling run synchronously; they finish
//! in seconds and have no intermediate progress worth streaming.

use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::api::enforce_rate_limit;
use crate::error::ApiError;
use crate::state::AppState;
use reverie_core::{ContentCache, ImageJobParams, JobPayload};

const MAX_STEPS: u32 = 50;

/// Generate an image, or return the cached artifact for an identical
/// request.
pub async fn generate(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(params): Json<ImageJobParams>,
) -> Result<impl IntoResponse, ApiError> {
    let quota = enforce_rate_limit(&state, &headers, &peer, "/images/generate")?;

    if params.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    if params.steps == 0 || params.steps > MAX_STEPS {
        return Err(ApiError::bad_request(format!(
            "steps must be between 1 and {MAX_STEPS}"
        )));
    }

    let key = ContentCache::key_for(&params.cache_key_params());
    let cached = {
        let cache = state.cache.clone();
        let key = key.clone();
        tokio::task::spawn_blocking(move || cache.lookup(&key))
            .await
            .map_err(|e| ApiError::internal(format!("cache lookup aborted: {e}")))?
    };

    if let Some(blob) = cached {
        info!(fingerprint = %key, "serving cached image");
        return Ok((
            StatusCode::OK,
            quota.headers(),
            Json(json!({
                "cached": true,
                "fingerprint": key,
                "image_base64": base64::engine::general_purpose::STANDARD.encode(blob),
            })),
        ));
    }

    let job_id = state.queue.submit(JobPayload::Image(params)).await?;
    info!(job_id, fingerprint = %key, "image job accepted");

    Ok((
        StatusCode::ACCEPTED,
        quota.headers(),
        Json(json!({
            "cached": false,
            "job_id": job_id,
            "status": "queued",
        })),
    ))
}

#[derive(Deserialize)]
pub struct FaceSwapRequest {
    pub source_base64: String,
    pub target_base64: String,
}

/// Swap the face from the source image onto the target image.
pub async fn face_swap(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<FaceSwapRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quota = enforce_rate_limit(&state, &headers, &peer, "/images/face-swap")?;

    let source = decode_image(&request.source_base64, "source_base64")?;
    let target = decode_image(&request.target_base64, "target_base64")?;

    let engines = state.engines.clone();
    let result = run_engine(move || engines.faces.swap(&source, &target)).await?;

    Ok((
        quota.headers(),
        Json(json!({
            "image_base64": base64::engine::general_purpose::STANDARD.encode(result),
        })),
    ))
}

#[derive(Deserialize)]
pub struct UpscaleRequest {
    pub image_base64: String,
    #[serde(default = "default_scale")]
    pub scale: f32,
}

fn default_scale() -> f32 {
    2.0
}

/// Upscale an image by the given factor.
pub async fn upscale(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<UpscaleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quota = enforce_rate_limit(&state, &headers, &peer, "/images/upscale")?;

    if !(1.0..=4.0).contains(&request.scale) {
        return Err(ApiError::bad_request("scale must be between 1.0 and 4.0"));
    }
    let image = decode_image(&request.image_base64, "image_base64")?;

    let engines = state.engines.clone();
    let scale = request.scale;
    let result = run_engine(move || engines.upscaler.upscale(&image, scale)).await?;

    Ok((
        quota.headers(),
        Json(json!({
            "image_base64": base64::engine::general_purpose::STANDARD.encode(result),
        })),
    ))
}

fn decode_image(encoded: &str, field: &str) -> Result<Vec<u8>, ApiError> {
    // Accept raw base64 and data URLs.
    let payload = encoded
        .rsplit_once("base64,")
        .map_or(encoded, |(_, tail)| tail);
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|_| ApiError::bad_request(format!("{field} is not valid base64")))
}

async fn run_engine<T, F>(f: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> reverie_core::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::internal(format!("engine task aborted: {e}")))?
        .map_err(ApiError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_urls_and_raw_base64_both_decode() {
        let raw = base64::engine::general_purpose::STANDARD.encode(b"png");
        assert_eq!(decode_image(&raw, "f").unwrap(), b"png");
        let data_url = format!("data:image/png;base64,{raw}");
        assert_eq!(decode_image(&data_url, "f").unwrap(), b"png");
    }

    #[test]
    fn invalid_base64_is_a_bad_request() {
        let err = decode_image("not-base-64!!!", "source_base64").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert!(err.message.contains("source_base64"));
    }
}
