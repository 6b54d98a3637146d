use super::timeline::{assemble, place_segments, samples_for, DubSegment, Fit};
use super::{wav, Synthesizer, VoiceReference, TRACK_SAMPLE_RATE};
use crate::config::Config;
use crate::error::{CueFailure, DubsubError, Result};
use crate::pipeline::Stage;
use crate::subtitle::SubtitleDocument;
use crate::translate::RetryPolicy;
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct DubbingOptions {
    pub concurrency: usize,
    /// Ceiling on clip time compression.
    pub max_speed_ratio: f64,
    pub retry: RetryPolicy,
    pub show_progress: bool,
}

impl Default for DubbingOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            max_speed_ratio: 1.3,
            retry: RetryPolicy::default(),
            show_progress: false,
        }
    }
}

impl DubbingOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency,
            max_speed_ratio: config.max_speed_ratio,
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            show_progress: false,
        }
    }
}

#[derive(Debug)]
pub struct DubbingOutcome {
    /// Mono track at `sample_rate`, exactly as long as the video.
    pub track: Vec<f32>,
    pub sample_rate: u32,
    /// Cues left silent.
    pub failures: Vec<CueFailure>,
    /// Cues whose clip had to be compressed, extended or cut.
    pub adjusted: Vec<(usize, Fit)>,
}

impl DubbingOutcome {
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.track.len() as f64 / self.sample_rate as f64)
    }
}

/// Synthesizes each cue and lays the clips out on one track.
pub struct DubbingStage {
    synthesizer: Arc<dyn Synthesizer>,
    options: DubbingOptions,
}

impl DubbingStage {
    pub fn new(synthesizer: Arc<dyn Synthesizer>, options: DubbingOptions) -> Self {
        Self {
            synthesizer,
            options,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.options.show_progress = show;
        self
    }

    /// Build the dub track for `document`, `video_duration` long.
    ///
    /// A cue whose synthesis fails is left silent and reported; the stage
    /// fails only if no cue could be synthesized.
    pub async fn run(
        &self,
        document: &SubtitleDocument,
        video_duration: Duration,
        voice: Option<&VoiceReference>,
        cancel: &AtomicBool,
    ) -> Result<DubbingOutcome> {
        if cancel.load(Ordering::SeqCst) {
            return Err(DubsubError::Cancelled);
        }

        let language = document.language().to_string();
        let total = document.len();
        info!(
            "Dubbing {} cues in {} with {}{}",
            total,
            language,
            self.synthesizer.name(),
            if voice.is_some() { " (voice clone)" } else { "" }
        );

        let progress_bar = if self.options.show_progress {
            let pb = ProgressBar::new(total as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} clips ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut futures = FuturesUnordered::new();

        for cue in document.cues() {
            let sem = semaphore.clone();
            let pb = progress_bar.clone();
            let language = language.as_str();

            futures.push(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return (cue, None);
                };
                if cancel.load(Ordering::SeqCst) {
                    return (cue, None);
                }

                debug!("Synthesizing cue {}", cue.index);
                let result = self
                    .options
                    .retry
                    .run("synthesize", || {
                        self.synthesizer.synthesize(&cue.text, language, voice)
                    })
                    .await;

                if let Some(ref pb) = pb {
                    pb.inc(1);
                }
                (cue, Some(result))
            });
        }

        let mut segments = Vec::with_capacity(total);
        let mut failures = Vec::new();
        while let Some((cue, result)) = futures.next().await {
            let samples = match result {
                Some(Ok(audio)) => wav::resample(&audio, TRACK_SAMPLE_RATE),
                Some(Err(error)) => {
                    warn!("Cue {} synthesis failed: {}", cue.index, error);
                    failures.push(CueFailure {
                        cue_index: cue.index,
                        error,
                    });
                    Vec::new()
                }
                None => Vec::new(),
            };
            segments.push(DubSegment {
                cue_index: cue.index,
                target_start: cue.start,
                window_end: cue.end,
                natural_duration: Duration::from_secs_f64(
                    samples.len() as f64 / TRACK_SAMPLE_RATE as f64,
                ),
                samples,
            });
        }

        drop(futures);
        self.synthesizer.release().await;

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Dubbing complete");
        }

        if cancel.load(Ordering::SeqCst) {
            return Err(DubsubError::Cancelled);
        }

        failures.sort_by_key(|f| f.cue_index);
        if total > 0 && failures.len() == total {
            let first = failures[0].error.to_string();
            return Err(DubsubError::fatal(
                Stage::Dub,
                format!("all {} cues failed to synthesize ({})", total, first),
            ));
        }

        let placed = place_segments(
            segments,
            TRACK_SAMPLE_RATE,
            video_duration,
            self.options.max_speed_ratio,
        );
        let adjusted = placed
            .iter()
            .filter(|p| !matches!(p.fit, Fit::Natural | Fit::Silent))
            .map(|p| (p.cue_index, p.fit))
            .collect();
        let track = assemble(&placed, samples_for(video_duration, TRACK_SAMPLE_RATE));

        info!(
            "Dub track assembled: {:.1}s, {} silent cue(s)",
            video_duration.as_secs_f64(),
            failures.len()
        );

        Ok(DubbingOutcome {
            track,
            sample_rate: TRACK_SAMPLE_RATE,
            failures,
            adjusted,
        })
    }
}
