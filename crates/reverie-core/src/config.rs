//! Configuration for the Reverie studio backend

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main studio configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudioConfig {
    /// Root directory for job artifacts, avatars and served files
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Directory holding model checkpoints for the inference daemon
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Directory for the content-addressable generation cache
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Public base URL used when building artifact links
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Hard timeout for external ffmpeg invocations (seconds)
    #[serde(default = "default_ffmpeg_timeout_secs")]
    pub ffmpeg_timeout_secs: u64,

    /// Cache entries older than this are removed by a sweep (days)
    #[serde(default = "default_cache_max_age_days")]
    pub cache_max_age_days: u64,

    /// Completed/failed jobs kept in the status table before pruning
    #[serde(default = "default_max_finished_jobs")]
    pub max_finished_jobs: usize,

    /// Idle rate-limiter clients older than this are swept (seconds)
    #[serde(default = "default_rate_limit_retention_secs")]
    pub rate_limit_retention_secs: u64,

    /// External TTS command (expects `<cmd> --text T --voice V --write-media OUT`)
    #[serde(default = "default_tts_command")]
    pub tts_command: String,

    /// Unix socket of the persistent heavy-model inference daemon
    #[serde(default = "default_inference_socket")]
    pub inference_socket: PathBuf,
}

impl Default for StudioConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            models_dir: default_models_dir(),
            cache_dir: default_cache_dir(),
            base_url: default_base_url(),
            ffmpeg_timeout_secs: default_ffmpeg_timeout_secs(),
            cache_max_age_days: default_cache_max_age_days(),
            max_finished_jobs: default_max_finished_jobs(),
            rate_limit_retention_secs: default_rate_limit_retention_secs(),
            tts_command: default_tts_command(),
            inference_socket: default_inference_socket(),
        }
    }
}

impl StudioConfig {
    /// Per-job artifact directory root.
    pub fn jobs_dir(&self) -> PathBuf {
        self.data_dir.join("jobs")
    }

    /// Directory of uploaded avatar images.
    pub fn avatars_dir(&self) -> PathBuf {
        self.data_dir.join("avatars")
    }
}

fn env_dir(var: &str) -> Option<PathBuf> {
    let raw = std::env::var(var).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn default_data_dir() -> PathBuf {
    env_dir("REVERIE_DATA_DIR").unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reverie")
            .join("data")
    })
}

fn default_models_dir() -> PathBuf {
    env_dir("REVERIE_MODELS_DIR").unwrap_or_else(|| {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("reverie")
            .join("models")
    })
}

fn default_cache_dir() -> PathBuf {
    default_data_dir().join("cache")
}

fn default_base_url() -> String {
    std::env::var("REVERIE_BASE_URL").unwrap_or_default()
}

fn default_ffmpeg_timeout_secs() -> u64 {
    600
}

fn default_cache_max_age_days() -> u64 {
    7
}

fn default_max_finished_jobs() -> usize {
    256
}

fn default_rate_limit_retention_secs() -> u64 {
    3600
}

fn default_tts_command() -> String {
    "edge-tts".to_string()
}

fn default_inference_socket() -> PathBuf {
    PathBuf::from("/tmp/reverie_inference.sock")
}
