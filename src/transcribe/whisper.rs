use crate::config::Config;
use crate::error::{CapabilityError, CapabilityResult};
use crate::transcribe::{cue_from_seconds, Transcriber, Transcript};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Maximum upload size accepted by whisper-style APIs (25 MB).
const MAX_FILE_SIZE: u64 = 25 * 1024 * 1024;

/// Client for an OpenAI-compatible `/audio/transcriptions` endpoint.
pub struct RemoteWhisper {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
}

impl RemoteWhisper {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: "whisper-large-v3".to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.api_base.clone(),
            config.api_key.clone().unwrap_or_default(),
        )
        .with_model(config.transcription_model.clone())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Build the multipart form for the API request.
    async fn build_form(&self, audio_path: &Path, language: Option<&str>) -> CapabilityResult<Form> {
        let file_bytes = fs::read(audio_path).await.map_err(|e| {
            CapabilityError::Unsupported(format!("cannot read {}: {}", audio_path.display(), e))
        })?;
        let file_name = audio_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio.wav")
            .to_string();

        let mime_type = match audio_path.extension().and_then(|e| e.to_str()) {
            Some("wav") => "audio/wav",
            Some("mp3") => "audio/mpeg",
            Some("m4a") => "audio/mp4",
            Some("flac") => "audio/flac",
            Some("ogg") => "audio/ogg",
            _ => "application/octet-stream",
        };

        let file_part = Part::bytes(file_bytes)
            .file_name(file_name)
            .mime_str(mime_type)?;

        let mut form = Form::new()
            .part("file", file_part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        if let Some(lang) = language {
            form = form.text("language", lang.to_string());
        }

        Ok(form)
    }

    fn parse_response(response: WhisperResponse) -> Transcript {
        let cues = match response.segments {
            Some(segments) => segments
                .iter()
                .map(|s| cue_from_seconds(s.start, s.end, &s.text))
                .collect(),
            // No timing at all: one cue spanning the reported duration.
            None => vec![cue_from_seconds(
                0.0,
                response.duration.unwrap_or(0.0),
                &response.text,
            )],
        };

        Transcript {
            language: response.language,
            cues,
        }
    }
}

#[async_trait]
impl Transcriber for RemoteWhisper {
    async fn transcribe(
        &self,
        audio: &Path,
        language_hint: Option<&str>,
    ) -> CapabilityResult<Transcript> {
        debug!("Transcribing {} with {}", audio.display(), self.model);

        let size = fs::metadata(audio)
            .await
            .map(|m| m.len())
            .map_err(|e| CapabilityError::Unsupported(format!("{}: {}", audio.display(), e)))?;
        if size > MAX_FILE_SIZE {
            return Err(CapabilityError::Unsupported(format!(
                "audio too large for the transcription API: {} bytes (max {} bytes)",
                size, MAX_FILE_SIZE
            )));
        }

        let form = self.build_form(audio, language_hint).await?;
        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.api_base))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        debug!("Transcription API response status: {}", status);
        let body = response.text().await?;

        if !status.is_success() {
            let detail = serde_json::from_str::<ApiErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(CapabilityError::from_status(status, &detail));
        }

        let parsed: WhisperResponse = serde_json::from_str(&body).map_err(|e| {
            CapabilityError::InvalidResponse(format!("transcription response: {}", e))
        })?;

        let transcript = Self::parse_response(parsed);
        debug!("Transcription API returned {} segments", transcript.cues.len());
        Ok(transcript)
    }

    fn name(&self) -> &'static str {
        "remote-whisper"
    }

    fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Option<Vec<WhisperSegment>>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    start: f64,
    end: f64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_parse_response_with_segments() {
        let response: WhisperResponse = serde_json::from_str(
            r#"{
                "text": "Hello world. How are you?",
                "language": "english",
                "duration": 4.0,
                "segments": [
                    {"start": 0.0, "end": 2.0, "text": " Hello world."},
                    {"start": 2.5, "end": 4.0, "text": " How are you?"}
                ]
            }"#,
        )
        .unwrap();

        let transcript = RemoteWhisper::parse_response(response);
        assert_eq!(transcript.language.as_deref(), Some("english"));
        assert_eq!(transcript.cues.len(), 2);
        assert_eq!(transcript.cues[0].text, "Hello world.");
        assert_eq!(transcript.cues[1].start, Duration::from_millis(2500));
    }

    #[test]
    fn test_parse_response_without_segments() {
        let response: WhisperResponse =
            serde_json::from_str(r#"{"text": "Hello world", "duration": 2.0}"#).unwrap();

        let transcript = RemoteWhisper::parse_response(response);
        assert!(transcript.language.is_none());
        assert_eq!(transcript.cues.len(), 1);
        assert_eq!(transcript.cues[0].end, Duration::from_secs(2));
    }

    #[test]
    fn test_from_config() {
        let config = Config {
            api_base: "http://localhost:9000/v1/".to_string(),
            transcription_model: "whisper-large-v3-turbo".to_string(),
            ..Config::default()
        };
        let client = RemoteWhisper::from_config(&config);
        assert_eq!(client.api_base, "http://localhost:9000/v1");
        assert_eq!(client.model(), "whisper-large-v3-turbo");
    }
}
