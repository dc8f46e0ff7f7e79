//! Subtitle generation: transcription segments, SRT rendering and
//! ffmpeg burn-in.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engines::ffmpeg::Ffmpeg;
use crate::engines::Transcriber;
use crate::error::Result;

/// One transcribed span of speech.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtitleSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl SubtitleSegment {
    /// Render this segment as one SRT block (1-based index).
    pub fn to_srt_block(&self, index: usize) -> String {
        format!(
            "{}\n{} --> {}\n{}\n\n",
            index,
            format_timestamp(self.start),
            format_timestamp(self.end),
            self.text
        )
    }
}

/// Seconds to SRT timestamp (HH:MM:SS,mmm).
fn format_timestamp(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u64;
    let minutes = ((seconds % 3600.0) / 60.0) as u64;
    let secs = (seconds % 60.0) as u64;
    let millis = (((seconds % 1.0) * 1000.0).round() as u64).min(999);
    format!("{hours:02}:{minutes:02}:{secs:02},{millis:03}")
}

/// Write segments out as an SRT file.
pub fn write_srt(segments: &[SubtitleSegment], path: &Path) -> Result<()> {
    let mut srt = String::new();
    for (i, segment) in segments.iter().enumerate() {
        srt.push_str(&segment.to_srt_block(i + 1));
    }
    fs::write(path, srt)?;
    Ok(())
}

/// Visual style for burned-in subtitles.
#[derive(Debug, Clone)]
pub struct SubtitleStyle {
    pub font_size: u32,
    pub font_color: String,
    pub outline_color: String,
}

impl Default for SubtitleStyle {
    fn default() -> Self {
        Self {
            font_size: 24,
            font_color: "white".to_string(),
            outline_color: "black".to_string(),
        }
    }
}

/// Transcribe a job's audio and burn synchronized subtitles into its
/// video.
pub struct SubtitlePipeline {
    transcriber: Arc<dyn Transcriber>,
    ffmpeg: Ffmpeg,
    style: SubtitleStyle,
}

impl SubtitlePipeline {
    pub fn new(transcriber: Arc<dyn Transcriber>, ffmpeg: Ffmpeg) -> Self {
        Self {
            transcriber,
            ffmpeg,
            style: SubtitleStyle::default(),
        }
    }

    pub fn with_style(mut self, style: SubtitleStyle) -> Self {
        self.style = style;
        self
    }

    /// Full pipeline: transcribe `audio`, write `<video>.srt`, burn the
    /// subtitles into a `_subtitled.mp4` sibling of `video`.
    pub fn subtitle_video(&self, video: &Path, audio: &Path) -> Result<PathBuf> {
        let segments = self.transcriber.transcribe(audio)?;
        info!(segments = segments.len(), "transcription complete");

        let srt_path = video.with_extension("srt");
        write_srt(&segments, &srt_path)?;

        let output = subtitled_path(video);
        self.ffmpeg
            .burn_subtitles(video, &srt_path, &output, &self.style)?;
        Ok(output)
    }
}

fn subtitled_path(video: &Path) -> PathBuf {
    let stem = video
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("result");
    video.with_file_name(format!("{stem}_subtitled.mp4"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_in_srt_format() {
        assert_eq!(format_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_timestamp(1.5), "00:00:01,500");
        assert_eq!(format_timestamp(3661.042), "01:01:01,042");
    }

    #[test]
    fn srt_blocks_are_one_indexed() {
        let segment = SubtitleSegment {
            start: 0.0,
            end: 2.5,
            text: "Hola mundo".to_string(),
        };
        let block = segment.to_srt_block(1);
        assert!(block.starts_with("1\n00:00:00,000 --> 00:00:02,500\nHola mundo\n"));
    }

    #[test]
    fn write_srt_concatenates_blocks() {
        let dir = std::env::temp_dir().join(format!("reverie-srt-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("out.srt");

        let segments = vec![
            SubtitleSegment {
                start: 0.0,
                end: 1.0,
                text: "uno".to_string(),
            },
            SubtitleSegment {
                start: 1.0,
                end: 2.0,
                text: "dos".to_string(),
            },
        ];
        write_srt(&segments, &path).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.contains("1\n00:00:00,000 --> 00:00:01,000\nuno"));
        assert!(contents.contains("2\n00:00:01,000 --> 00:00:02,000\ndos"));
    }

    #[test]
    fn subtitled_path_appends_suffix() {
        let path = subtitled_path(Path::new("/data/jobs/vid_1/result.mp4"));
        assert_eq!(path, PathBuf::from("/data/jobs/vid_1/result_subtitled.mp4"));
    }
}
