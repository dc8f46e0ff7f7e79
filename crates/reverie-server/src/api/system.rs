//! Health and resource introspection endpoints

use std::time::Duration;

use axum::{extract::State, Json};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::error::ApiError;
use crate::state::AppState;
use reverie_core::ModelLocation;

/// Liveness probe.
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
        "jobs_tracked": state.queue.len().await,
    }))
}

#[derive(Serialize)]
struct ModelSlot {
    name: String,
    location: ModelLocation,
}

/// Accelerator, cache, and limiter state in one snapshot.
pub async fn resources(State(state): State<AppState>) -> Json<serde_json::Value> {
    let models: Vec<ModelSlot> = state
        .vram
        .slot_locations()
        .into_iter()
        .map(|(name, location)| ModelSlot { name, location })
        .collect();

    Json(json!({
        "active_model": state.vram.active_model(),
        "models": models,
        "cache": state.cache.stats(),
        "rate_limiter": state.limiter.stats(),
        "jobs_tracked": state.queue.len().await,
        "event_subscribers": state.events.subscriber_count(),
    }))
}

/// Remove cache entries older than the configured maximum age.
pub async fn sweep_cache(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    let max_age = Duration::from_secs(state.config.cache_max_age_days * 24 * 3600);
    let cache = state.cache.clone();
    let removed = tokio::task::spawn_blocking(move || cache.sweep(max_age))
        .await
        .map_err(|e| ApiError::internal(format!("sweep task aborted: {e}")))??;

    info!(removed, "cache sweep finished");
    Ok(Json(json!({ "removed": removed })))
}
