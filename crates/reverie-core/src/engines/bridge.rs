//! Bridge to the persistent heavy-model inference daemon.
//!
//! The daemon owns the actual GPU pipelines (diffusion, face analysis,
//! upscaling, speech recognition) and speaks newline-delimited JSON
//! over a Unix socket: one request line in, zero or more progress
//! lines out, then exactly one terminal line carrying the result or an
//! error.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::engines::{
    FaceProcessor, ImageRequest, ImageSynthesizer, ModelProvider, PortraitAnimator, Transcriber,
    Upscaler,
};
use crate::error::{Error, Result};
use crate::subtitles::SubtitleSegment;
use crate::vram::AcceleratorModel;

const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(900);

/// One line received from the daemon.
#[derive(Debug, Default, Deserialize)]
struct BridgeReply {
    #[serde(default)]
    progress: Option<u8>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    image_base64: Option<String>,
    #[serde(default)]
    video_path: Option<String>,
    #[serde(default)]
    segments: Option<Vec<SubtitleSegment>>,
    #[serde(default)]
    capabilities: Option<Vec<String>>,
}

pub struct InferenceBridge {
    socket_path: PathBuf,
    io_timeout: Duration,
}

impl InferenceBridge {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }

    pub fn with_io_timeout(mut self, io_timeout: Duration) -> Self {
        self.io_timeout = io_timeout;
        self
    }

    /// Whether the daemon is accepting connections right now.
    pub fn is_reachable(&self) -> bool {
        UnixStream::connect(&self.socket_path).is_ok()
    }

    /// Capabilities advertised by the daemon ("generate_image",
    /// "animate_portrait", ...).
    pub fn capabilities(&self) -> Result<Vec<String>> {
        let reply = self.call(&json!({"command": "status"}), &mut |_| {})?;
        Ok(reply.capabilities.unwrap_or_default())
    }

    /// Send one request and read lines until the terminal reply.
    fn call(
        &self,
        request: &serde_json::Value,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<BridgeReply> {
        let stream = UnixStream::connect(&self.socket_path).map_err(|e| {
            Error::Collaborator(format!(
                "inference daemon unreachable at {}: {e}",
                self.socket_path.display()
            ))
        })?;
        stream.set_read_timeout(Some(self.io_timeout))?;
        stream.set_write_timeout(Some(self.io_timeout))?;

        let mut writer = stream.try_clone()?;
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        writer.write_all(line.as_bytes())?;
        writer.flush()?;

        let reader = BufReader::new(stream);
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let reply: BridgeReply = serde_json::from_str(&line).map_err(|e| {
                Error::Collaborator(format!("malformed daemon reply: {e}"))
            })?;

            if let Some(error) = reply.error {
                return Err(Error::Collaborator(error));
            }
            if let Some(progress) = reply.progress {
                debug!(progress, "daemon progress");
                on_progress(progress.min(100));
                continue;
            }
            return Ok(reply);
        }

        Err(Error::Collaborator(
            "inference daemon closed the connection before replying".to_string(),
        ))
    }

    fn decode_image(reply: BridgeReply) -> Result<Vec<u8>> {
        let encoded = reply.image_base64.ok_or_else(|| {
            Error::Collaborator("daemon reply carried no image".to_string())
        })?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::Collaborator(format!("daemon sent invalid image data: {e}")))
    }
}

impl ImageSynthesizer for InferenceBridge {
    fn generate(
        &self,
        request: &ImageRequest,
        on_progress: &mut dyn FnMut(u8),
    ) -> Result<Vec<u8>> {
        let reply = self.call(
            &json!({
                "command": "generate_image",
                "prompt": request.prompt,
                "negative_prompt": request.negative_prompt,
                "steps": request.steps,
                "guidance": request.guidance,
                "width": request.width,
                "height": request.height,
            }),
            on_progress,
        )?;
        Self::decode_image(reply)
    }
}

impl FaceProcessor for InferenceBridge {
    fn swap(&self, source_png: &[u8], target_png: &[u8]) -> Result<Vec<u8>> {
        let encode = |bytes| base64::engine::general_purpose::STANDARD.encode::<&[u8]>(bytes);
        let reply = self.call(
            &json!({
                "command": "face_swap",
                "source_base64": encode(source_png),
                "target_base64": encode(target_png),
            }),
            &mut |_| {},
        )?;
        Self::decode_image(reply)
    }
}

impl Upscaler for InferenceBridge {
    fn upscale(&self, image_png: &[u8], scale: f32) -> Result<Vec<u8>> {
        let reply = self.call(
            &json!({
                "command": "upscale",
                "image_base64": base64::engine::general_purpose::STANDARD.encode(image_png),
                "scale": scale,
            }),
            &mut |_| {},
        )?;
        Self::decode_image(reply)
    }
}

impl Transcriber for InferenceBridge {
    fn transcribe(&self, audio_path: &Path) -> Result<Vec<SubtitleSegment>> {
        let reply = self.call(
            &json!({
                "command": "transcribe",
                "audio_path": audio_path.to_string_lossy(),
            }),
            &mut |_| {},
        )?;
        reply.segments.ok_or_else(|| {
            Error::Collaborator("daemon reply carried no transcription".to_string())
        })
    }
}

/// Portrait animation through the daemon, available only when the
/// daemon advertises it.
pub struct BridgeAnimator {
    bridge: Arc<InferenceBridge>,
}

impl BridgeAnimator {
    pub fn new(bridge: Arc<InferenceBridge>) -> Self {
        Self { bridge }
    }
}

impl PortraitAnimator for BridgeAnimator {
    fn is_available(&self) -> bool {
        match self.bridge.capabilities() {
            Ok(caps) => caps.iter().any(|c| c == "animate_portrait"),
            Err(e) => {
                warn!(error = %e, "animator availability check failed");
                false
            }
        }
    }

    fn animate(&self, image: &Path, audio: &Path, work_dir: &Path) -> Result<PathBuf> {
        let reply = self.bridge.call(
            &json!({
                "command": "animate_portrait",
                "image_path": image.to_string_lossy(),
                "audio_path": audio.to_string_lossy(),
                "output_dir": work_dir.to_string_lossy(),
            }),
            &mut |_| {},
        )?;
        let path = reply.video_path.ok_or_else(|| {
            Error::Collaborator("daemon reply carried no video path".to_string())
        })?;
        Ok(PathBuf::from(path))
    }
}

/// Accelerator model handles backed by daemon load/offload commands.
pub struct BridgeModelProvider {
    bridge: Arc<InferenceBridge>,
}

impl BridgeModelProvider {
    pub fn new(bridge: Arc<InferenceBridge>) -> Self {
        Self { bridge }
    }
}

impl ModelProvider for BridgeModelProvider {
    fn model(&self, name: &str) -> Result<Arc<dyn AcceleratorModel>> {
        Ok(Arc::new(DaemonModel {
            bridge: self.bridge.clone(),
            name: name.to_string(),
        }))
    }
}

struct DaemonModel {
    bridge: Arc<InferenceBridge>,
    name: String,
}

impl AcceleratorModel for DaemonModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn load_to_device(&self) -> Result<()> {
        self.bridge
            .call(
                &json!({"command": "load_model", "model": self.name}),
                &mut |_| {},
            )
            .map_err(|e| Error::ModelLoadError(format!("{}: {e}", self.name)))?;
        Ok(())
    }

    fn offload(&self) -> Result<()> {
        self.bridge
            .call(
                &json!({"command": "offload_model", "model": self.name}),
                &mut |_| {},
            )
            .map_err(|e| Error::ModelLoadError(format!("{}: {e}", self.name)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixListener;
    use uuid::Uuid;

    /// One-shot fake daemon that answers each connection with the
    /// given lines.
    fn spawn_daemon(lines: Vec<String>) -> PathBuf {
        let path = std::env::temp_dir().join(format!("reverie-bridge-{}.sock", Uuid::new_v4()));
        let listener = UnixListener::bind(&path).unwrap();
        std::thread::spawn(move || {
            if let Ok((stream, _)) = listener.accept() {
                let mut reader = BufReader::new(stream.try_clone().unwrap());
                let mut request = String::new();
                let _ = reader.read_line(&mut request);
                let mut writer = stream;
                for line in lines {
                    let _ = writeln!(writer, "{line}");
                }
            }
        });
        path
    }

    #[test]
    fn unreachable_daemon_is_a_collaborator_error() {
        let bridge = InferenceBridge::new(PathBuf::from("/tmp/reverie-no-such.sock"));
        let err = bridge.capabilities().unwrap_err();
        assert!(matches!(err, Error::Collaborator(_)));
    }

    #[test]
    fn progress_lines_are_forwarded_before_the_result() {
        let encoded = base64::engine::general_purpose::STANDARD.encode(b"png");
        let path = spawn_daemon(vec![
            r#"{"progress": 25}"#.to_string(),
            r#"{"progress": 75}"#.to_string(),
            format!(r#"{{"image_base64": "{encoded}"}}"#),
        ]);
        let bridge = InferenceBridge::new(path).with_io_timeout(Duration::from_secs(5));

        let request = ImageRequest {
            prompt: "a fox".to_string(),
            negative_prompt: String::new(),
            steps: 4,
            guidance: 0.0,
            width: 1024,
            height: 1024,
        };
        let mut seen = Vec::new();
        let image = bridge.generate(&request, &mut |p| seen.push(p)).unwrap();

        assert_eq!(seen, vec![25, 75]);
        assert_eq!(image, b"png");
    }

    #[test]
    fn daemon_errors_propagate_as_collaborator_failures() {
        let path = spawn_daemon(vec![r#"{"error": "out of memory"}"#.to_string()]);
        let bridge = InferenceBridge::new(path).with_io_timeout(Duration::from_secs(5));

        let err = bridge
            .transcribe(Path::new("/tmp/audio.mp3"))
            .unwrap_err();
        assert!(err.to_string().contains("out of memory"));
    }

    #[test]
    fn transcription_segments_deserialize() {
        let path = spawn_daemon(vec![
            r#"{"segments": [{"start": 0.0, "end": 1.2, "text": "hola"}]}"#.to_string(),
        ]);
        let bridge = InferenceBridge::new(path).with_io_timeout(Duration::from_secs(5));

        let segments = bridge.transcribe(Path::new("/tmp/audio.mp3")).unwrap();
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, "hola");
    }

    #[test]
    fn connection_closed_without_reply_is_an_error() {
        let path = spawn_daemon(vec![]);
        let bridge = InferenceBridge::new(path).with_io_timeout(Duration::from_secs(5));
        let err = bridge.capabilities().unwrap_err();
        assert!(err.to_string().contains("closed the connection"));
    }
}
