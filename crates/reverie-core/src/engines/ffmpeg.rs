//! External ffmpeg invocations with a hard timeout.

use std::ffi::OsStr;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::subtitles::SubtitleStyle;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Thin wrapper around the ffmpeg binary. Every invocation is bounded
/// by the configured timeout and killed on overrun.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    binary: String,
    timeout: Duration,
}

impl Ffmpeg {
    pub fn new(timeout: Duration) -> Self {
        Self {
            binary: "ffmpeg".to_string(),
            timeout,
        }
    }

    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Loop a single image over an audio track into a video, the
    /// fallback when no portrait animator is available.
    pub fn compose_still(&self, image: &Path, audio: &Path, output: &Path) -> Result<()> {
        self.run([
            OsStr::new("-y"),
            OsStr::new("-loop"),
            OsStr::new("1"),
            OsStr::new("-i"),
            image.as_os_str(),
            OsStr::new("-i"),
            audio.as_os_str(),
            OsStr::new("-c:v"),
            OsStr::new("libx264"),
            OsStr::new("-tune"),
            OsStr::new("stillimage"),
            OsStr::new("-c:a"),
            OsStr::new("aac"),
            OsStr::new("-b:a"),
            OsStr::new("192k"),
            OsStr::new("-pix_fmt"),
            OsStr::new("yuv420p"),
            OsStr::new("-shortest"),
            output.as_os_str(),
        ])
    }

    /// Burn an SRT file into a video with the given style.
    pub fn burn_subtitles(
        &self,
        video: &Path,
        srt: &Path,
        output: &Path,
        style: &SubtitleStyle,
    ) -> Result<()> {
        let filter = subtitle_filter(srt, style);
        self.run([
            OsStr::new("-y"),
            OsStr::new("-i"),
            video.as_os_str(),
            OsStr::new("-vf"),
            OsStr::new(&filter),
            OsStr::new("-c:a"),
            OsStr::new("copy"),
            output.as_os_str(),
        ])
    }

    /// Extract the audio track of a video as mp3.
    pub fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        self.run([
            OsStr::new("-y"),
            OsStr::new("-i"),
            video.as_os_str(),
            OsStr::new("-vn"),
            OsStr::new("-acodec"),
            OsStr::new("libmp3lame"),
            OsStr::new("-q:a"),
            OsStr::new("2"),
            output.as_os_str(),
        ])
    }

    fn run<I, S>(&self, args: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Collaborator(format!("failed to spawn {}: {e}", self.binary)))?;

        // Drain stderr concurrently so a chatty ffmpeg can't fill the
        // pipe and stall.
        let mut stderr = child.stderr.take();
        let stderr_reader = std::thread::spawn(move || {
            let mut buf = String::new();
            if let Some(ref mut pipe) = stderr {
                let _ = pipe.read_to_string(&mut buf);
            }
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        warn!(timeout_secs = self.timeout.as_secs(), "ffmpeg timed out, killing");
                        let _ = child.kill();
                        let _ = child.wait();
                        return Err(Error::Timeout(format!(
                            "{} exceeded {}s",
                            self.binary,
                            self.timeout.as_secs()
                        )));
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    return Err(Error::Collaborator(format!("ffmpeg wait failed: {e}")));
                }
            }
        };

        let stderr_output = stderr_reader.join().unwrap_or_default();
        if !status.success() {
            let tail: String = stderr_output
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::Collaborator(format!(
                "{} exited with {status}: {tail}",
                self.binary
            )));
        }
        debug!("ffmpeg finished");
        Ok(())
    }
}

fn subtitle_filter(srt: &Path, style: &SubtitleStyle) -> String {
    format!(
        "subtitles={}:force_style='FontSize={},PrimaryColour=&H{},OutlineColour=&H{},Alignment=2,MarginV=30'",
        srt.to_string_lossy(),
        style.font_size,
        color_to_hex(&style.font_color),
        color_to_hex(&style.outline_color),
    )
}

fn color_to_hex(color: &str) -> &'static str {
    match color.to_lowercase().as_str() {
        "black" => "000000",
        "red" => "FF0000",
        "blue" => "0000FF",
        "yellow" => "FFFF00",
        _ => "FFFFFF",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subtitle_filter_carries_style() {
        let style = SubtitleStyle::default();
        let filter = subtitle_filter(Path::new("/tmp/out.srt"), &style);
        assert!(filter.starts_with("subtitles=/tmp/out.srt:force_style="));
        assert!(filter.contains("FontSize=24"));
        assert!(filter.contains("PrimaryColour=&HFFFFFF"));
        assert!(filter.contains("OutlineColour=&H000000"));
    }

    #[test]
    fn unknown_colors_fall_back_to_white() {
        assert_eq!(color_to_hex("chartreuse"), "FFFFFF");
        assert_eq!(color_to_hex("Yellow"), "FFFF00");
    }

    #[test]
    fn missing_binary_is_a_collaborator_error() {
        let ffmpeg = Ffmpeg::new(Duration::from_secs(1))
            .with_binary("definitely-not-ffmpeg-binary");
        let err = ffmpeg
            .compose_still(
                Path::new("/tmp/a.jpg"),
                Path::new("/tmp/a.mp3"),
                Path::new("/tmp/out.mp4"),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Collaborator(_)));
    }

    #[test]
    fn timeout_kills_long_running_process() {
        // `sleep` stands in for a wedged ffmpeg.
        let ffmpeg = Ffmpeg::new(Duration::from_millis(200)).with_binary("sleep");
        let err = ffmpeg.run(["5"]).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
