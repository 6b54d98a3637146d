pub mod local;
pub mod stage;
pub mod whisper;

pub use local::LocalWhisper;
pub use stage::TranscriptionStage;
pub use whisper::RemoteWhisper;

use crate::config::{Config, TranscriptionProvider};
use crate::error::CapabilityResult;
use crate::subtitle::Cue;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// Provider output before it becomes a [`crate::subtitle::SubtitleDocument`].
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Language reported by the provider, as the provider spelled it.
    pub language: Option<String>,
    pub cues: Vec<Cue>,
}

/// Segment timing as whisper-style JSON reports it, in seconds.
pub(crate) fn cue_from_seconds(start: f64, end: f64, text: &str) -> Cue {
    Cue::new(
        Duration::from_secs_f64(start.max(0.0)),
        Duration::from_secs_f64(end.max(0.0)),
        text.trim(),
    )
}

/// Speech-to-text capability.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file. `language_hint` is `None` for
    /// auto-detection.
    async fn transcribe(
        &self,
        audio: &Path,
        language_hint: Option<&str>,
    ) -> CapabilityResult<Transcript>;

    fn name(&self) -> &'static str;

    /// Model identifier, part of the transcription artifact signature.
    fn model(&self) -> &str;
}

/// Build the transcriber selected by configuration.
pub fn transcriber_from_config(config: &Config) -> Arc<dyn Transcriber> {
    match config.transcription_provider {
        TranscriptionProvider::Remote => Arc::new(RemoteWhisper::from_config(config)),
        TranscriptionProvider::Local => Arc::new(LocalWhisper::from_config(config)),
    }
}
