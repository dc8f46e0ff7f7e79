//! Job records and payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::cache::CacheKeyParams;

/// Lifecycle state of a job. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Kind of work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Video,
    Image,
}

impl JobKind {
    /// Prefix used when deriving job identifiers.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            JobKind::Video => "vid",
            JobKind::Image => "img",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Video => write!(f, "video"),
            JobKind::Image => write!(f, "image"),
        }
    }
}

/// Parameters for an avatar video render.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoJobParams {
    #[serde(default)]
    pub avatar_id: Option<String>,
    pub script: String,
    #[serde(default = "default_voice")]
    pub voice_id: String,
    #[serde(default)]
    pub generate_subtitles: bool,
}

fn default_voice() -> String {
    "es-CO-SalomeNeural".to_string()
}

/// Parameters for an image generation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageJobParams {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_style")]
    pub style: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default)]
    pub guidance: f32,
    #[serde(default = "default_aspect_ratio")]
    pub aspect_ratio: String,
}

fn default_style() -> String {
    "Fooocus V2".to_string()
}

fn default_steps() -> u32 {
    4
}

fn default_aspect_ratio() -> String {
    "1:1".to_string()
}

/// Map an aspect ratio label to standard SDXL output dimensions.
/// Unknown labels fall back to square.
pub fn dimensions_for_aspect_ratio(ratio: &str) -> (u32, u32) {
    match ratio {
        "1:1" => (1024, 1024),
        "16:9" => (1344, 768),
        "9:16" => (768, 1344),
        "21:9" => (1536, 640),
        "9:21" => (640, 1536),
        "11:8" => (1152, 832),
        "8:11" => (832, 1152),
        "4:3" => (1152, 896),
        "3:4" => (896, 1152),
        _ => (1024, 1024),
    }
}

impl ImageJobParams {
    /// Cache fingerprint input for this request. Style and negative
    /// prompt go into the extras because both change the output bytes.
    pub fn cache_key_params(&self) -> CacheKeyParams {
        let (width, height) = dimensions_for_aspect_ratio(&self.aspect_ratio);
        let mut extra = BTreeMap::new();
        extra.insert("style".to_string(), self.style.clone());
        extra.insert("negative_prompt".to_string(), self.negative_prompt.clone());
        CacheKeyParams {
            prompt: self.prompt.clone(),
            steps: self.steps,
            guidance: self.guidance,
            width,
            height,
            extra,
        }
    }
}

/// Request parameters carried by a job for the worker to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum JobPayload {
    Video(VideoJobParams),
    Image(ImageJobParams),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Video(_) => JobKind::Video,
            JobPayload::Image(_) => JobKind::Image,
        }
    }
}

/// One unit of enqueued, asynchronously executed work.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobKind,
    pub status: JobStatus,
    pub progress: u8,
    pub created_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip)]
    pub payload: JobPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
    }

    #[test]
    fn aspect_ratios_map_to_sdxl_dimensions() {
        assert_eq!(dimensions_for_aspect_ratio("16:9"), (1344, 768));
        assert_eq!(dimensions_for_aspect_ratio("9:16"), (768, 1344));
        assert_eq!(dimensions_for_aspect_ratio("bogus"), (1024, 1024));
    }

    #[test]
    fn cache_key_params_carry_style_and_negative_prompt() {
        let params = ImageJobParams {
            prompt: "a fox".to_string(),
            negative_prompt: "blurry".to_string(),
            style: "Fooocus V2".to_string(),
            steps: 4,
            guidance: 0.0,
            aspect_ratio: "16:9".to_string(),
        };
        let key = params.cache_key_params();
        assert_eq!((key.width, key.height), (1344, 768));
        assert_eq!(key.extra.get("style").unwrap(), "Fooocus V2");
        assert_eq!(key.extra.get("negative_prompt").unwrap(), "blurry");
    }

    #[test]
    fn video_params_default_voice_and_subtitles() {
        let params: VideoJobParams =
            serde_json::from_str(r#"{"script": "hola mundo"}"#).unwrap();
        assert_eq!(params.voice_id, "es-CO-SalomeNeural");
        assert!(!params.generate_subtitles);
    }
}
