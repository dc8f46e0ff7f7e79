//! Collaborator interfaces consumed by the worker.
//!
//! The inference engines themselves live outside this process; the
//! traits here pin down their call boundary. All calls are synchronous
//! and slow (seconds to minutes) from the worker's point of view, and
//! any error they raise fails the current job, never the worker.

pub mod bridge;
pub mod ffmpeg;
pub mod tts;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use crate::config::StudioConfig;
use crate::error::Result;
use crate::subtitles::SubtitleSegment;
use crate::vram::AcceleratorModel;

use ffmpeg::Ffmpeg;

/// Parameters for one image synthesis call.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub negative_prompt: String,
    pub steps: u32,
    pub guidance: f32,
    pub width: u32,
    pub height: u32,
}

/// Image synthesis engine (the diffusion pipeline).
pub trait ImageSynthesizer: Send + Sync {
    /// Generate PNG bytes. `on_progress` is called with 0..=100 as
    /// denoising steps complete.
    fn generate(&self, request: &ImageRequest, on_progress: &mut dyn FnMut(u8))
        -> Result<Vec<u8>>;
}

/// Speech synthesis engine.
pub trait SpeechSynthesizer: Send + Sync {
    fn synthesize(&self, text: &str, voice: &str, out_path: &Path) -> Result<()>;
}

/// Speech-to-text engine.
pub trait Transcriber: Send + Sync {
    fn transcribe(&self, audio_path: &Path) -> Result<Vec<SubtitleSegment>>;
}

/// Portrait animation engine (face animation driven by audio).
pub trait PortraitAnimator: Send + Sync {
    /// Whether the richer animation path can run at all right now.
    fn is_available(&self) -> bool;

    fn animate(&self, image: &Path, audio: &Path, work_dir: &Path) -> Result<PathBuf>;
}

/// Face swap engine.
pub trait FaceProcessor: Send + Sync {
    fn swap(&self, source_png: &[u8], target_png: &[u8]) -> Result<Vec<u8>>;
}

/// Image upscaling engine.
pub trait Upscaler: Send + Sync {
    fn upscale(&self, image_png: &[u8], scale: f32) -> Result<Vec<u8>>;
}

/// Source of accelerator model handles for the resource manager.
pub trait ModelProvider: Send + Sync {
    fn model(&self, name: &str) -> Result<Arc<dyn AcceleratorModel>>;
}

/// How a video job turns an avatar image plus audio into video.
/// Selected once per pipeline based on collaborator availability, so
/// the fallback is a deliberate choice rather than exception handling
/// at call time.
pub enum AnimationStrategy {
    /// Full portrait animation through the animator collaborator.
    Portrait(Arc<dyn PortraitAnimator>),
    /// Static composite: loop the avatar frame over the audio track.
    StillFrame(Ffmpeg),
}

impl AnimationStrategy {
    pub fn select(animator: &Arc<dyn PortraitAnimator>, ffmpeg: &Ffmpeg) -> Self {
        if animator.is_available() {
            AnimationStrategy::Portrait(animator.clone())
        } else {
            info!("portrait animator unavailable, using still-frame composite");
            AnimationStrategy::StillFrame(ffmpeg.clone())
        }
    }

    pub fn animate(&self, image: &Path, audio: &Path, work_dir: &Path) -> Result<PathBuf> {
        match self {
            AnimationStrategy::Portrait(animator) => animator.animate(image, audio, work_dir),
            AnimationStrategy::StillFrame(ffmpeg) => {
                let output = work_dir.join("result.mp4");
                ffmpeg.compose_still(image, audio, &output)?;
                Ok(output)
            }
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            AnimationStrategy::Portrait(_) => "portrait",
            AnimationStrategy::StillFrame(_) => "still_frame",
        }
    }
}

/// The full set of collaborators the worker and API depend on.
pub struct Engines {
    pub image: Arc<dyn ImageSynthesizer>,
    pub tts: Arc<dyn SpeechSynthesizer>,
    pub transcriber: Arc<dyn Transcriber>,
    pub animator: Arc<dyn PortraitAnimator>,
    pub faces: Arc<dyn FaceProcessor>,
    pub upscaler: Arc<dyn Upscaler>,
    pub models: Arc<dyn ModelProvider>,
    pub ffmpeg: Ffmpeg,
}

impl Engines {
    /// Default wiring: heavy models behind the inference daemon
    /// socket, TTS through an external CLI, compositing through
    /// ffmpeg.
    pub fn from_config(config: &StudioConfig) -> Self {
        let daemon = Arc::new(bridge::InferenceBridge::new(config.inference_socket.clone()));
        let ffmpeg = Ffmpeg::new(std::time::Duration::from_secs(config.ffmpeg_timeout_secs));

        Self {
            image: daemon.clone(),
            transcriber: daemon.clone(),
            faces: daemon.clone(),
            upscaler: daemon.clone(),
            animator: Arc::new(bridge::BridgeAnimator::new(daemon.clone())),
            models: Arc::new(bridge::BridgeModelProvider::new(daemon)),
            tts: Arc::new(tts::ProcessTts::new(config.tts_command.clone())),
            ffmpeg,
        }
    }
}
