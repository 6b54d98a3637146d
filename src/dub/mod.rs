//! Dub track synthesis and timeline assembly.

pub mod local;
pub mod remote;
pub mod stage;
pub mod timeline;
pub mod wav;

pub use local::LocalSpeech;
pub use remote::RemoteSpeech;
pub use stage::{DubbingOptions, DubbingOutcome, DubbingStage};

use crate::config::{Config, SynthesisProvider};
use crate::error::{CapabilityResult, DubsubError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Sample rate of the assembled dub track.
pub const TRACK_SAMPLE_RATE: u32 = 24_000;

/// Mono PCM produced by a synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesizedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl SynthesizedAudio {
    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Reference recording for voice cloning, with its transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceReference {
    pub audio: PathBuf,
    pub text: String,
}

impl VoiceReference {
    /// Build a reference from optional CLI values. Both or neither must be
    /// given, and the audio file must exist.
    pub fn from_parts(audio: Option<PathBuf>, text: Option<String>) -> Result<Option<Self>> {
        match (audio, text) {
            (None, None) => Ok(None),
            (Some(audio), Some(text)) => {
                if !audio.is_file() {
                    return Err(DubsubError::Configuration(format!(
                        "Reference audio not found: {}",
                        audio.display()
                    )));
                }
                if text.trim().is_empty() {
                    return Err(DubsubError::Configuration(
                        "Reference text must not be empty".to_string(),
                    ));
                }
                Ok(Some(Self { audio, text }))
            }
            _ => Err(DubsubError::Configuration(
                "Voice cloning needs both --ref-audio and --ref-text".to_string(),
            )),
        }
    }
}

/// Text-to-speech capability.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        voice_ref: Option<&VoiceReference>,
    ) -> CapabilityResult<SynthesizedAudio>;

    fn name(&self) -> &'static str;

    fn model(&self) -> &str {
        self.name()
    }

    /// Preset voice, for providers that have them.
    fn voice(&self) -> Option<&str> {
        None
    }

    fn supports_voice_cloning(&self) -> bool {
        false
    }

    /// Release resources held between calls, such as a loaded model.
    /// Called once a stage has finished with the synthesizer.
    async fn release(&self) {}
}

pub fn synthesizer_from_config(config: &Config) -> Arc<dyn Synthesizer> {
    match config.synthesis_provider {
        SynthesisProvider::Remote => Arc::new(RemoteSpeech::from_config(config)),
        SynthesisProvider::Local => Arc::new(LocalSpeech::from_config(config)),
    }
}
