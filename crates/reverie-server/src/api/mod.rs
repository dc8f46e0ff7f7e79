//! API routes and handlers

mod catalog;
mod events;
mod images;
mod jobs;
mod system;

use std::net::SocketAddr;

use axum::{
    http::{HeaderMap, HeaderName},
    response::AppendHeaders,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::error::ApiError;
use crate::state::AppState;
use reverie_core::Decision;

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    let api_routes = Router::new()
        // Health and introspection
        .route("/health", get(system::health))
        .route("/system/resources", get(system::resources))
        .route("/admin/cache/sweep", post(system::sweep_cache))
        // Jobs
        .route("/jobs/video", post(jobs::submit_video))
        .route("/jobs/:id", get(jobs::get_job))
        // Image operations
        .route("/images/generate", post(images::generate))
        .route("/images/face-swap", post(images::face_swap))
        .route("/images/upscale", post(images::upscale))
        // Catalogs and prompt tools
        .route("/avatars", get(catalog::list_avatars))
        .route("/voices", get(catalog::list_voices))
        .route("/styles", get(catalog::list_styles))
        .route("/prompt/enhance", post(catalog::enhance))
        // Live job updates
        .route("/events", get(events::stream));

    Router::new()
        .nest("/api/v1", api_routes)
        // Serve generated artifacts (job outputs, avatars)
        .nest_service(
            "/files",
            tower_http::services::ServeDir::new(state.config.data_dir.clone()),
        )
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Rate headers echoed on admitted requests.
pub(crate) struct RateQuota {
    limit: usize,
    remaining: usize,
    window_secs: u64,
}

impl RateQuota {
    pub(crate) fn headers(&self) -> AppendHeaders<[(HeaderName, String); 3]> {
        AppendHeaders([
            (
                HeaderName::from_static("x-ratelimit-limit"),
                self.limit.to_string(),
            ),
            (
                HeaderName::from_static("x-ratelimit-remaining"),
                self.remaining.to_string(),
            ),
            (
                HeaderName::from_static("x-ratelimit-window"),
                self.window_secs.to_string(),
            ),
        ])
    }
}

/// Admit one request against the endpoint's policy, or reject with 429.
pub(crate) fn enforce_rate_limit(
    state: &AppState,
    headers: &HeaderMap,
    peer: &SocketAddr,
    endpoint: &str,
) -> Result<RateQuota, ApiError> {
    let client = client_ip(headers, peer);
    match state.limiter.check(&client, endpoint) {
        Decision::Allowed {
            limit,
            remaining,
            window_secs,
        } => Ok(RateQuota {
            limit,
            remaining,
            window_secs,
        }),
        Decision::Limited {
            retry_after_secs, ..
        } => Err(ApiError::too_many_requests(retry_after_secs)),
    }
}

/// Best client identity available: proxy headers first, then the peer
/// address.
pub(crate) fn client_ip(headers: &HeaderMap, peer: &SocketAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
    }
    if let Some(real_ip) = headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
    {
        let trimmed = real_ip.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }
    peer.ip().to_string()
}
