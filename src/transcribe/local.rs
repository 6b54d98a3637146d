//! Transcription through a locally installed whisper command line tool.

use crate::config::Config;
use crate::error::{CapabilityError, CapabilityResult};
use crate::transcribe::{cue_from_seconds, Transcriber, Transcript};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Runs `whisper <audio> --output_format json` and reads the JSON it writes.
pub struct LocalWhisper {
    binary: PathBuf,
    model_size: String,
}

impl LocalWhisper {
    pub fn new(binary: impl Into<PathBuf>, model_size: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            model_size: model_size.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.whisper_binary, config.local_model.clone())
    }

    fn parse_output(json: &str) -> CapabilityResult<Transcript> {
        let output: WhisperCliOutput = serde_json::from_str(json).map_err(|e| {
            CapabilityError::InvalidResponse(format!("whisper JSON output: {}", e))
        })?;

        Ok(Transcript {
            language: output.language,
            cues: output
                .segments
                .iter()
                .map(|s| cue_from_seconds(s.start, s.end, &s.text))
                .collect(),
        })
    }
}

#[async_trait]
impl Transcriber for LocalWhisper {
    async fn transcribe(
        &self,
        audio: &Path,
        language_hint: Option<&str>,
    ) -> CapabilityResult<Transcript> {
        info!(
            "Transcribing {} locally with whisper ({})",
            audio.display(),
            self.model_size
        );

        let temp_dir = tempfile::tempdir().map_err(|e| {
            CapabilityError::Unavailable(format!("cannot create temp directory: {}", e))
        })?;

        let mut cmd = Command::new(&self.binary);
        cmd.arg(audio)
            .arg("--model")
            .arg(&self.model_size)
            .arg("--task")
            .arg("transcribe")
            .arg("--output_dir")
            .arg(temp_dir.path())
            .arg("--output_format")
            .arg("json");

        if let Some(lang) = language_hint {
            cmd.arg("--language").arg(lang);
        }

        let output = cmd.output().await.map_err(|e| {
            CapabilityError::Unavailable(format!(
                "failed to execute {}: {}",
                self.binary.display(),
                e
            ))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CapabilityError::Unavailable(format!(
                "whisper failed: {}",
                stderr.trim()
            )));
        }

        let stem = audio
            .file_stem()
            .ok_or_else(|| CapabilityError::Unsupported("audio path has no file name".into()))?;
        let json_file = temp_dir
            .path()
            .join(format!("{}.json", stem.to_string_lossy()));

        let json = tokio::fs::read_to_string(&json_file).await.map_err(|e| {
            CapabilityError::InvalidResponse(format!("cannot read {}: {}", json_file.display(), e))
        })?;

        let transcript = Self::parse_output(&json)?;
        debug!("whisper produced {} segments", transcript.cues.len());
        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        "local-whisper"
    }

    fn model(&self) -> &str {
        &self.model_size
    }
}

#[derive(Debug, Deserialize)]
struct WhisperCliOutput {
    #[serde(default)]
    segments: Vec<WhisperCliSegment>,
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WhisperCliSegment {
    start: f64,
    end: f64,
    text: String,
}
