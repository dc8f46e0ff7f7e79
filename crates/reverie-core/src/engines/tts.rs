//! Speech synthesis through an external TTS command.

use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::engines::SpeechSynthesizer;
use crate::error::{Error, Result};

/// Invokes a CLI speech synthesizer (edge-tts by default):
/// `<cmd> --text <text> --voice <voice> --write-media <out>`.
pub struct ProcessTts {
    command: String,
}

impl ProcessTts {
    pub fn new(command: String) -> Self {
        Self { command }
    }
}

impl SpeechSynthesizer for ProcessTts {
    fn synthesize(&self, text: &str, voice: &str, out_path: &Path) -> Result<()> {
        info!(voice, chars = text.len(), "synthesizing speech");

        let output = Command::new(&self.command)
            .arg("--text")
            .arg(text)
            .arg("--voice")
            .arg(voice)
            .arg("--write-media")
            .arg(out_path)
            .output()
            .map_err(|e| Error::Collaborator(format!("failed to run {}: {e}", self.command)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Collaborator(format!(
                "{} exited with {}: {}",
                self.command,
                output.status,
                stderr.trim()
            )));
        }

        let produced = std::fs::metadata(out_path).map(|m| m.len()).unwrap_or(0);
        if produced == 0 {
            return Err(Error::Collaborator(format!(
                "{} produced no audio at {}",
                self.command,
                out_path.display()
            )));
        }

        debug!(bytes = produced, "speech synthesis complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn missing_command_is_a_collaborator_error() {
        let tts = ProcessTts::new("definitely-not-a-tts-binary".to_string());
        let out = std::env::temp_dir().join(format!("reverie-tts-{}.mp3", Uuid::new_v4()));
        let err = tts
            .synthesize("hola", "es-MX-DaliaNeural", &out)
            .unwrap_err();
        assert!(matches!(err, Error::Collaborator(_)));
    }

    #[test]
    fn empty_output_file_is_a_failure() {
        // `true` exits 0 without writing anything.
        let tts = ProcessTts::new("true".to_string());
        let out = std::env::temp_dir().join(format!("reverie-tts-{}.mp3", Uuid::new_v4()));
        let err = tts
            .synthesize("hola", "es-MX-DaliaNeural", &out)
            .unwrap_err();
        assert!(err.to_string().contains("produced no audio"));
    }
}
