use crate::error::{DubsubError, Result};
use crate::languages::{code_from_detected, is_auto, normalize_code};
use crate::pipeline::Stage;
use crate::subtitle::{filter_hallucinations, HallucinationFilter, SubtitleDocument};
use crate::transcribe::Transcriber;
use crate::translate::RetryPolicy;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

/// Turns an audio track into a source-language subtitle document.
pub struct TranscriptionStage {
    transcriber: Arc<dyn Transcriber>,
    retry: RetryPolicy,
    filter: HallucinationFilter,
}

impl TranscriptionStage {
    pub fn new(transcriber: Arc<dyn Transcriber>, retry: RetryPolicy) -> Self {
        Self {
            transcriber,
            retry,
            filter: HallucinationFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: HallucinationFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Transcribe `audio`. `source` is a language code or `auto`.
    ///
    /// Every provider failure is fatal: there is nothing downstream can do
    /// without a transcript.
    pub async fn run(
        &self,
        audio: &Path,
        source: &str,
        cancel: &AtomicBool,
    ) -> Result<SubtitleDocument> {
        if cancel.load(Ordering::SeqCst) {
            return Err(DubsubError::Cancelled);
        }

        let hint = (!is_auto(source)).then(|| normalize_code(source));
        info!(
            "Transcribing with {} ({}), language: {}",
            self.transcriber.name(),
            self.transcriber.model(),
            hint.as_deref().unwrap_or("auto")
        );

        let transcript = self
            .retry
            .run("transcribe", || {
                self.transcriber.transcribe(audio, hint.as_deref())
            })
            .await
            .map_err(|e| DubsubError::fatal(Stage::Transcribe, e.to_string()))?;

        let language = match (hint, transcript.language.as_deref()) {
            (Some(hint), _) => hint,
            (None, Some(reported)) => {
                let code = code_from_detected(reported);
                info!("Detected language: {}", code);
                code
            }
            (None, None) => {
                return Err(DubsubError::fatal(
                    Stage::Transcribe,
                    "provider did not report the detected language",
                ))
            }
        };

        let mut document = SubtitleDocument::new(language, transcript.cues);
        filter_hallucinations(&mut document, &self.filter);

        if document.is_empty() {
            return Err(DubsubError::fatal(
                Stage::Transcribe,
                "no speech was recognized in the audio track",
            ));
        }

        info!("Transcription produced {} cues", document.len());
        Ok(document)
    }
}
