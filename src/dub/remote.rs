use super::{wav, SynthesizedAudio, Synthesizer, VoiceReference};
use crate::config::Config;
use crate::error::{CapabilityError, CapabilityResult};
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

/// Synthesizer backed by an OpenAI-compatible `/audio/speech` endpoint.
pub struct RemoteSpeech {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    voice: String,
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
}

impl RemoteSpeech {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: "tts-1".to_string(),
            voice: "alloy".to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let base = config
            .speech_api_base
            .clone()
            .unwrap_or_else(|| config.api_base.clone());
        Self::new(base, config.api_key.clone().unwrap_or_default())
            .with_model(config.speech_model.clone())
            .with_voice(config.speech_voice.clone())
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }
}

#[async_trait]
impl Synthesizer for RemoteSpeech {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice_ref: Option<&VoiceReference>,
    ) -> CapabilityResult<SynthesizedAudio> {
        if voice_ref.is_some() {
            return Err(CapabilityError::Unsupported(
                "voice cloning is only available with the local synthesizer".to_string(),
            ));
        }

        debug!("Synthesizing {} chars ({}) with {}", text.len(), language, self.model);

        let request = SpeechRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            response_format: "wav",
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CapabilityError::from_status(status, &body));
        }

        let bytes = response.bytes().await?;
        wav::decode(&bytes)
            .map_err(|e| CapabilityError::InvalidResponse(format!("speech audio: {}", e)))
    }

    fn name(&self) -> &'static str {
        "remote-speech"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn voice(&self) -> Option<&str> {
        Some(&self.voice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_speech_api_base_overrides() {
        let config = Config {
            api_base: "https://api.example.com/v1".to_string(),
            speech_api_base: Some("http://localhost:8880/v1/".to_string()),
            speech_voice: "nova".to_string(),
            ..Config::default()
        };
        let speech = RemoteSpeech::from_config(&config);
        assert_eq!(speech.api_base, "http://localhost:8880/v1");
        assert_eq!(speech.voice, "nova");
    }

    #[tokio::test]
    async fn test_rejects_voice_reference() {
        let speech = RemoteSpeech::new("http://127.0.0.1:9", "key");
        let voice = VoiceReference {
            audio: "ref.wav".into(),
            text: "hi".into(),
        };
        let result = speech.synthesize("Bonjour", "fr", Some(&voice)).await;
        assert!(matches!(result, Err(CapabilityError::Unsupported(_))));
    }
}
