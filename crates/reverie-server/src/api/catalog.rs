//! Voice, style, and avatar catalogs, plus prompt enhancement

use std::net::SocketAddr;
use std::path::Path;

use axum::{
    extract::{ConnectInfo, State},
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::api::enforce_rate_limit;
use crate::error::ApiError;
use crate::state::AppState;
use reverie_core::styles::enhance_prompt;

#[derive(Serialize)]
pub struct Voice {
    pub id: &'static str,
    pub name: &'static str,
    pub gender: &'static str,
    pub locale: &'static str,
}

const VOICES: &[Voice] = &[
    Voice {
        id: "es-CO-SalomeNeural",
        name: "Salome",
        gender: "female",
        locale: "es-CO",
    },
    Voice {
        id: "es-CO-GonzaloNeural",
        name: "Gonzalo",
        gender: "male",
        locale: "es-CO",
    },
    Voice {
        id: "es-MX-DaliaNeural",
        name: "Dalia",
        gender: "female",
        locale: "es-MX",
    },
    Voice {
        id: "es-MX-JorgeNeural",
        name: "Jorge",
        gender: "male",
        locale: "es-MX",
    },
];

/// List the supported narration voices.
pub async fn list_voices() -> Json<serde_json::Value> {
    Json(json!({ "voices": VOICES }))
}

/// List the style presets applicable to image generation.
pub async fn list_styles(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "styles": state.styles.names() }))
}

#[derive(Debug, PartialEq, Serialize)]
pub struct AvatarInfo {
    pub id: String,
    pub url: String,
}

/// List uploaded avatar images with their public URLs. The returned
/// ids are valid `avatar_id` values for video jobs.
pub async fn list_avatars(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dir = state.config.avatars_dir();
    let base_url = state.config.base_url.clone();
    let avatars = tokio::task::spawn_blocking(move || avatar_entries(&dir, &base_url))
        .await
        .map_err(|e| ApiError::internal(format!("avatar listing aborted: {e}")))?;
    Ok(Json(json!({ "avatars": avatars })))
}

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "webp"];

fn avatar_entries(dir: &Path, base_url: &str) -> Vec<AvatarInfo> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut avatars: Vec<AvatarInfo> = entries
        .flatten()
        .filter_map(|entry| {
            let name = entry.file_name().into_string().ok()?;
            let ext = Path::new(&name).extension()?.to_str()?.to_lowercase();
            if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
                return None;
            }
            Some(AvatarInfo {
                url: format!("{base_url}/files/avatars/{name}"),
                id: name,
            })
        })
        .collect();
    avatars.sort_by(|a, b| a.id.cmp(&b.id));
    avatars
}

#[derive(Deserialize)]
pub struct EnhanceRequest {
    pub prompt: String,
}

/// Expand a short prompt with quality and composition keywords.
pub async fn enhance(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<EnhanceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let quota = enforce_rate_limit(&state, &headers, &peer, "/prompt/enhance")?;

    if request.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }

    let enhanced = enhance_prompt(&request.prompt);
    Ok((
        quota.headers(),
        Json(json!({
            "original": request.prompt,
            "enhanced": enhanced,
        })),
    ))
}
