//! Runs Extract → Transcribe → Translate → Dub → Mux for one input file.

use super::artifacts::{is_valid_artifact, ArtifactStore, FileIdentity, StageSignature};
use super::{PipelineRun, Stage};
use crate::cache::{CacheStats, TranslationCache};
use crate::config::Config;
use crate::dub::{wav, DubbingOptions, DubbingStage, Synthesizer, VoiceReference, TRACK_SAMPLE_RATE};
use crate::error::{CueFailure, DubsubError, Result};
use crate::languages::{is_auto, normalize_code, validate_pair};
use crate::media::{BackgroundSeparator, MediaTool, MuxRequest};
use crate::storage::write_atomic;
use crate::subtitle::{srt, SubtitleDocument};
use crate::transcribe::{Transcriber, TranscriptionStage};
use crate::translate::{RetryPolicy, TranslationOptions, TranslationStage, Translator};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// What to do with one input file.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub input: PathBuf,
    /// Source language code, or `auto`.
    pub source: String,
    pub target: String,
    pub dub: bool,
    pub voice: Option<VoiceReference>,
    /// Stop before muxing.
    pub subs_only: bool,
    /// Render subtitles into the picture instead of adding a track.
    pub burn_subs: bool,
    /// Mix the original music and ambience under the dub.
    pub keep_background: bool,
    pub work_dir: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub show_progress: bool,
}

impl RunOptions {
    pub fn new(input: impl Into<PathBuf>, source: &str, target: &str) -> Self {
        Self {
            input: input.into(),
            source: source.to_string(),
            target: target.to_string(),
            dub: false,
            voice: None,
            subs_only: false,
            burn_subs: false,
            keep_background: false,
            work_dir: None,
            output: None,
            show_progress: false,
        }
    }

    pub fn with_dub(mut self, voice: Option<VoiceReference>) -> Self {
        self.dub = true;
        self.voice = voice;
        self
    }

    pub fn with_subs_only(mut self, subs_only: bool) -> Self {
        self.subs_only = subs_only;
        self
    }

    pub fn with_burn_subs(mut self, burn: bool) -> Self {
        self.burn_subs = burn;
        self
    }

    pub fn with_background(mut self, keep: bool) -> Self {
        self.keep_background = keep;
        self
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<PathBuf>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Final video path: `<input dir>/<stem>.<target>.mp4`, or
    /// `<stem>.<target>.dub.mp4` for a dubbed run.
    pub fn output_path(&self) -> PathBuf {
        if let Some(output) = &self.output {
            return output.clone();
        }
        let stem = self.input.file_stem().unwrap_or_default().to_string_lossy();
        let target = normalize_code(&self.target);
        let name = if self.dub {
            format!("{stem}.{target}.dub.mp4")
        } else {
            format!("{stem}.{target}.mp4")
        };
        self.input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(name)
    }

    /// Reject a run that cannot succeed, before any stage starts.
    pub fn validate(&self, capabilities: &Capabilities) -> Result<()> {
        if !self.input.is_file() {
            return Err(DubsubError::FileNotFound(self.input.display().to_string()));
        }
        validate_pair(&self.source, &self.target, self.dub)?;

        if !self.dub && self.voice.is_some() {
            return Err(DubsubError::Configuration(
                "--ref-audio/--ref-text only apply with --dub".to_string(),
            ));
        }
        if self.dub {
            match &capabilities.synthesizer {
                None => {
                    return Err(DubsubError::Configuration(
                        "Dubbing requested but no synthesizer is configured".to_string(),
                    ))
                }
                Some(synth) if self.voice.is_some() && !synth.supports_voice_cloning() => {
                    return Err(DubsubError::Configuration(format!(
                        "{} does not support voice cloning",
                        synth.name()
                    )))
                }
                Some(_) => {}
            }
        }
        if self.keep_background {
            if !self.dub {
                return Err(DubsubError::Configuration(
                    "--keep-background only applies with --dub".to_string(),
                ));
            }
            if capabilities.separator.is_none() {
                return Err(DubsubError::Configuration(
                    "Background requested but no separator is configured".to_string(),
                ));
            }
        }
        if self.burn_subs && self.subs_only {
            return Err(DubsubError::Configuration(
                "--burn-subs needs a muxed video and cannot be combined with --subs-only"
                    .to_string(),
            ));
        }
        if !self.subs_only && self.output_path() == self.input {
            return Err(DubsubError::Configuration(
                "Output path must differ from the input".to_string(),
            ));
        }
        Ok(())
    }
}

/// External capabilities the pipeline calls out to.
#[derive(Clone)]
pub struct Capabilities {
    pub media: Arc<dyn MediaTool>,
    pub transcriber: Arc<dyn Transcriber>,
    pub translator: Arc<dyn Translator>,
    pub synthesizer: Option<Arc<dyn Synthesizer>>,
    /// Needed only for runs that keep the background audio.
    pub separator: Option<Arc<dyn BackgroundSeparator>>,
}

/// Audio produced by the dub stage.
#[derive(Debug, Clone)]
struct DubTracks {
    track: PathBuf,
    background: Option<PathBuf>,
}

/// Everything a finished (or failed) run produced.
#[derive(Debug)]
pub struct RunReport {
    pub run: PipelineRun,
    pub source_language: Option<String>,
    pub target_language: String,
    pub subtitles: Option<PathBuf>,
    pub dub_track: Option<PathBuf>,
    pub background: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub translation_failures: Vec<CueFailure>,
    pub synthesis_failures: Vec<CueFailure>,
    /// Dub clips that were sped up, extended or cut to fit.
    pub adjusted_clips: usize,
    pub cues: usize,
    pub cache_hits: usize,
    pub api_calls: usize,
    pub warnings: Vec<String>,
    pub cache_stats: CacheStats,
    pub error: Option<DubsubError>,
    pub elapsed: Duration,
}

impl RunReport {
    fn new(options: &RunOptions) -> Self {
        Self {
            run: PipelineRun::new(&options.input),
            source_language: None,
            target_language: normalize_code(&options.target),
            subtitles: None,
            dub_track: None,
            background: None,
            output: None,
            translation_failures: Vec::new(),
            synthesis_failures: Vec::new(),
            adjusted_clips: 0,
            cues: 0,
            cache_hits: 0,
            api_calls: 0,
            warnings: Vec::new(),
            cache_stats: CacheStats::default(),
            error: None,
            elapsed: Duration::ZERO,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    pub fn exit_code(&self) -> i32 {
        self.error.as_ref().map_or(0, DubsubError::exit_code)
    }
}

pub struct PipelineOrchestrator {
    capabilities: Capabilities,
    cache: Arc<TranslationCache>,
    config: Config,
}

impl PipelineOrchestrator {
    pub fn new(capabilities: Capabilities, cache: Arc<TranslationCache>, config: Config) -> Self {
        Self {
            capabilities,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }

    /// Run every stage for `options.input`.
    ///
    /// Never returns early: the report carries per-stage status and the
    /// error that stopped the run, if any. Artifacts of completed stages are
    /// left in the work directory and the cache is flushed either way.
    pub async fn run(&self, options: &RunOptions, cancel: &AtomicBool) -> RunReport {
        let started = Instant::now();
        let mut report = RunReport::new(options);

        if let Err(e) = self.execute(options, cancel, &mut report).await {
            if let Some(stage) = e.stage() {
                report.run.mark_failed(stage);
            }
            match e {
                DubsubError::Cancelled => warn!("Run cancelled"),
                ref other => error!("{}", other),
            }
            report.error = Some(e);
        }

        if let Err(e) = self.cache.flush() {
            warn!("{}", e);
            report.warnings.push(e.to_string());
        }
        report.cache_stats = self.cache.stats();
        report.elapsed = started.elapsed();
        report
    }

    async fn execute(
        &self,
        options: &RunOptions,
        cancel: &AtomicBool,
        report: &mut RunReport,
    ) -> Result<()> {
        options.validate(&self.capabilities)?;

        let work_dir = options
            .work_dir
            .clone()
            .or_else(|| self.config.work_dir.clone())
            .unwrap_or_else(|| ArtifactStore::default_dir(&options.input));
        let mut store = ArtifactStore::open(work_dir, &options.input)?;
        let input = FileIdentity::of(&options.input)?;
        let target = normalize_code(&options.target);
        info!(
            "Processing {} (work dir {})",
            options.input.display(),
            store.dir().display()
        );

        // ═══════════════════════════════════════════════════════════════════
        // Stage 1: Extract
        // ═══════════════════════════════════════════════════════════════════
        let audio = self
            .extract(&mut store, &input, options, cancel, report)
            .await
            .map_err(|e| stage_error(Stage::Extract, e))?;

        // ═══════════════════════════════════════════════════════════════════
        // Stage 2: Transcribe
        // ═══════════════════════════════════════════════════════════════════
        let (source_doc, source_path) = self
            .transcribe(&mut store, &input, &audio, options, cancel, report)
            .await
            .map_err(|e| stage_error(Stage::Transcribe, e))?;

        // ═══════════════════════════════════════════════════════════════════
        // Stage 3: Translate
        // ═══════════════════════════════════════════════════════════════════
        let (target_doc, subtitles) = self
            .translate(&mut store, &input, source_doc, &source_path, &target, options, cancel, report)
            .await
            .map_err(|e| stage_error(Stage::Translate, e))?;

        // ═══════════════════════════════════════════════════════════════════
        // Stage 4: Dub (optional)
        // ═══════════════════════════════════════════════════════════════════
        let dub = self
            .dub(&mut store, &input, &audio, &target_doc, &subtitles, &target, options, cancel, report)
            .await
            .map_err(|e| stage_error(Stage::Dub, e))?;

        // ═══════════════════════════════════════════════════════════════════
        // Stage 5: Mux
        // ═══════════════════════════════════════════════════════════════════
        self.mux(&mut store, &input, &subtitles, dub.as_ref(), &target, options, cancel, report)
            .await
            .map_err(|e| stage_error(Stage::Mux, e))?;

        info!("Pipeline complete for {}", options.input.display());
        Ok(())
    }

    async fn extract(
        &self,
        store: &mut ArtifactStore,
        input: &FileIdentity,
        options: &RunOptions,
        cancel: &AtomicBool,
        report: &mut RunReport,
    ) -> Result<PathBuf> {
        check_cancel(cancel)?;
        let signature = StageSignature::new(Stage::Extract, input.clone()).setting("sample_rate", 16_000);

        if let Some(hit) = store.reusable(Stage::Extract, &signature) {
            info!("Stage 1/5: reusing extracted audio {}", hit.path.display());
            report.run.mark_done(Stage::Extract, &hit.path, true)?;
            return Ok(hit.path);
        }

        info!("Stage 1/5: Extracting audio from {}", options.input.display());
        store.forget(Stage::Extract)?;
        let audio = store.audio_path();
        let pb = StageSpinner::start(options.show_progress, "Extracting audio...");

        self.capabilities.media.extract_audio(&options.input, &audio).await?;
        if !is_valid_artifact(Stage::Extract, &audio) {
            return Err(DubsubError::fatal(
                Stage::Extract,
                format!("{} is not a valid WAV file", audio.display()),
            ));
        }
        pb.finish("✓ Audio extracted");

        report.run.mark_done(Stage::Extract, &audio, false)?;
        store.record(Stage::Extract, signature, &audio, None)?;
        Ok(audio)
    }

    async fn transcribe(
        &self,
        store: &mut ArtifactStore,
        input: &FileIdentity,
        audio: &Path,
        options: &RunOptions,
        cancel: &AtomicBool,
        report: &mut RunReport,
    ) -> Result<(SubtitleDocument, PathBuf)> {
        check_cancel(cancel)?;
        let source = normalize_code(&options.source);
        let transcriber = &self.capabilities.transcriber;
        let signature = StageSignature::new(Stage::Transcribe, input.clone())
            .upstream(FileIdentity::of(audio)?)
            .source(&source)
            .provider(transcriber.name())
            .model(transcriber.model());

        if let Some(hit) = store.reusable(Stage::Transcribe, &signature) {
            let language = hit
                .language
                .clone()
                .or_else(|| (!is_auto(&source)).then(|| source.clone()));
            if let Some(language) = language {
                let document = srt::read(&hit.path, &language)?;
                info!(
                    "Stage 2/5: reusing {} {} cues from {}",
                    document.len(),
                    language,
                    hit.path.display()
                );
                report.run.mark_done(Stage::Transcribe, &hit.path, true)?;
                report.source_language = Some(language);
                return Ok((document, hit.path));
            }
        }

        info!("Stage 2/5: Transcribing");
        store.forget(Stage::Transcribe)?;
        let pb = StageSpinner::start(options.show_progress, "Transcribing audio...");

        let stage = TranscriptionStage::new(transcriber.clone(), self.retry_policy());
        let document = stage.run(audio, &source, cancel).await?;

        let path = store.source_subtitles_path();
        write_atomic(&path, srt::format(&document).as_bytes())?;
        pb.finish(&format!("✓ Transcribed {} cues", document.len()));

        report.run.mark_done(Stage::Transcribe, &path, false)?;
        store.record(Stage::Transcribe, signature, &path, Some(document.language()))?;
        report.source_language = Some(document.language().to_string());
        Ok((document, path))
    }

    #[allow(clippy::too_many_arguments)]
    async fn translate(
        &self,
        store: &mut ArtifactStore,
        input: &FileIdentity,
        source_doc: SubtitleDocument,
        source_path: &Path,
        target: &str,
        options: &RunOptions,
        cancel: &AtomicBool,
        report: &mut RunReport,
    ) -> Result<(SubtitleDocument, PathBuf)> {
        check_cancel(cancel)?;
        let translator = &self.capabilities.translator;
        let signature = StageSignature::new(Stage::Translate, input.clone())
            .upstream(FileIdentity::of(source_path)?)
            .source(source_doc.language())
            .target(target)
            .provider(translator.name())
            .model(translator.model());
        report.cues = source_doc.len();

        if let Some(hit) = store.reusable(Stage::Translate, &signature) {
            let document = srt::read(&hit.path, target)?;
            if document.len() == source_doc.len() {
                info!("Stage 3/5: reusing {} translation {}", target, hit.path.display());
                report.run.mark_done(Stage::Translate, &hit.path, true)?;
                report.subtitles = Some(hit.path.clone());
                return Ok((document, hit.path));
            }
        }

        info!(
            "Stage 3/5: Translating {} cues {} -> {}",
            source_doc.len(),
            source_doc.language(),
            target
        );
        store.forget(Stage::Translate)?;

        let stage = TranslationStage::new(
            translator.clone(),
            self.cache.clone(),
            TranslationOptions::from_config(&self.config),
        )
        .with_progress(options.show_progress);
        let outcome = stage.run(source_doc, target, cancel).await?;

        let path = store.target_subtitles_path(target);
        write_atomic(&path, srt::format(&outcome.document).as_bytes())?;
        report.run.mark_done(Stage::Translate, &path, false)?;

        if outcome.failures.is_empty() {
            store.record(Stage::Translate, signature, &path, Some(target))?;
        } else {
            warn!(
                "{} cue(s) kept their source text and will be retried on the next run",
                outcome.failures.len()
            );
        }

        report.cache_hits = outcome.cache_hits;
        report.api_calls = outcome.api_calls;
        report.warnings.extend(outcome.warnings);
        report.translation_failures = outcome.failures;
        report.subtitles = Some(path.clone());
        Ok((outcome.document, path))
    }

    #[allow(clippy::too_many_arguments)]
    async fn dub(
        &self,
        store: &mut ArtifactStore,
        input: &FileIdentity,
        audio: &Path,
        document: &SubtitleDocument,
        subtitles: &Path,
        target: &str,
        options: &RunOptions,
        cancel: &AtomicBool,
        report: &mut RunReport,
    ) -> Result<Option<DubTracks>> {
        if !options.dub {
            report.run.mark_skipped(Stage::Dub);
            return Ok(None);
        }
        check_cancel(cancel)?;

        let synthesizer = self.capabilities.synthesizer.clone().ok_or_else(|| {
            DubsubError::Configuration("Dubbing requested but no synthesizer is configured".to_string())
        })?;
        let mut signature = StageSignature::new(Stage::Dub, input.clone())
            .upstream(FileIdentity::of(subtitles)?)
            .target(target)
            .provider(synthesizer.name())
            .model(synthesizer.model())
            .setting("max_speed_ratio", self.config.max_speed_ratio)
            .setting("sample_rate", TRACK_SAMPLE_RATE);
        if let Some(voice) = synthesizer.voice() {
            signature = signature.setting("voice", voice);
        }
        if let Some(reference) = &options.voice {
            signature = signature
                .upstream(FileIdentity::of(&reference.audio)?)
                .setting("ref_text", &reference.text);
        }

        if let Some(hit) = store.reusable(Stage::Dub, &signature) {
            info!("Stage 4/5: reusing dub track {}", hit.path.display());
            report.run.mark_done(Stage::Dub, &hit.path, true)?;
            report.dub_track = Some(hit.path.clone());
            let background = self.background(store, audio, options, false, report).await;
            return Ok(Some(DubTracks {
                track: hit.path,
                background,
            }));
        }

        info!("Stage 4/5: Dubbing {} cues", document.len());
        store.forget(Stage::Dub)?;

        let video_duration = self.capabilities.media.probe_duration(&options.input).await?;
        let stage = DubbingStage::new(synthesizer, DubbingOptions::from_config(&self.config))
            .with_progress(options.show_progress);
        let outcome = stage
            .run(document, video_duration, options.voice.as_ref(), cancel)
            .await?;

        let path = store.dub_path(target);
        wav::write(&path, &outcome.track, outcome.sample_rate)?;
        report.run.mark_done(Stage::Dub, &path, false)?;

        if outcome.failures.is_empty() {
            store.record(Stage::Dub, signature, &path, Some(target))?;
        } else {
            warn!(
                "{} cue(s) are silent in the dub track and will be retried on the next run",
                outcome.failures.len()
            );
        }

        report.adjusted_clips = outcome.adjusted.len();
        report.synthesis_failures = outcome.failures;
        report.dub_track = Some(path.clone());
        let background = self.background(store, audio, options, true, report).await;
        Ok(Some(DubTracks {
            track: path,
            background,
        }))
    }

    /// Background track for a run that keeps it. An existing one is reused
    /// unless `fresh`; a failed separation leaves the dub without it.
    async fn background(
        &self,
        store: &ArtifactStore,
        audio: &Path,
        options: &RunOptions,
        fresh: bool,
        report: &mut RunReport,
    ) -> Option<PathBuf> {
        if !options.keep_background {
            return None;
        }
        let separator = self.capabilities.separator.as_ref()?;
        let path = store.background_path();
        if !fresh && wav::is_valid(&path) {
            debug!("Reusing background track {}", path.display());
            report.background = Some(path.clone());
            return Some(path);
        }

        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                self.background_failed(report, format!("cannot replace {}: {}", path.display(), e));
                return None;
            }
        }

        info!("Separating background audio with {}", separator.name());
        let pb = StageSpinner::start(options.show_progress, "Separating background audio...");
        match separator.separate(audio, &path).await {
            Ok(()) if wav::is_valid(&path) => {
                pb.finish("✓ Background separated");
                report.background = Some(path.clone());
                Some(path)
            }
            Ok(()) => {
                self.background_failed(report, format!("{} is not a valid WAV file", path.display()));
                None
            }
            Err(e) => {
                self.background_failed(report, e.to_string());
                None
            }
        }
    }

    fn background_failed(&self, report: &mut RunReport, detail: String) {
        let message = format!("background separation failed, dub has no background: {}", detail);
        warn!("{}", message);
        report.warnings.push(message);
    }

    #[allow(clippy::too_many_arguments)]
    async fn mux(
        &self,
        store: &mut ArtifactStore,
        input: &FileIdentity,
        subtitles: &Path,
        dub: Option<&DubTracks>,
        target: &str,
        options: &RunOptions,
        cancel: &AtomicBool,
        report: &mut RunReport,
    ) -> Result<()> {
        if options.subs_only {
            info!("Subtitles only, not muxing");
            report.run.mark_skipped(Stage::Mux);
            return Ok(());
        }
        check_cancel(cancel)?;

        let output = options.output_path();
        let mut signature = StageSignature::new(Stage::Mux, input.clone())
            .upstream(FileIdentity::of(subtitles)?)
            .target(target)
            .setting("output", output.display())
            .setting("burn_subs", options.burn_subs);
        if let Some(dub) = dub {
            signature = signature.upstream(FileIdentity::of(&dub.track)?);
            if let Some(background) = &dub.background {
                signature = signature.upstream(FileIdentity::of(background)?);
            }
        }

        if let Some(hit) = store.reusable(Stage::Mux, &signature) {
            info!("Stage 5/5: {} is up to date", hit.path.display());
            report.run.mark_done(Stage::Mux, &hit.path, true)?;
            report.output = Some(hit.path);
            return Ok(());
        }

        info!("Stage 5/5: Muxing {}", output.display());
        store.forget(Stage::Mux)?;
        let pb = StageSpinner::start(options.show_progress, "Muxing video...");

        let request = MuxRequest {
            video: &options.input,
            subtitles,
            dub: dub.map(|d| d.track.as_path()),
            background: dub.and_then(|d| d.background.as_deref()),
            burn_subtitles: options.burn_subs,
            language: target,
            output: &output,
        };
        self.capabilities.media.mux(&request).await?;
        pb.finish("✓ Video muxed");

        report.run.mark_done(Stage::Mux, &output, false)?;
        store.record(Stage::Mux, signature, &output, Some(target))?;
        report.output = Some(output);
        Ok(())
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.config.max_attempts,
            Duration::from_millis(self.config.retry_base_delay_ms),
        )
    }
}

fn check_cancel(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::SeqCst) {
        Err(DubsubError::Cancelled)
    } else {
        Ok(())
    }
}

/// Attribute an error raised while `stage` ran to that stage.
fn stage_error(stage: Stage, error: DubsubError) -> DubsubError {
    match error {
        DubsubError::FatalStage { .. } | DubsubError::Cancelled | DubsubError::Configuration(_) => {
            error
        }
        other => DubsubError::fatal(stage, other.to_string()),
    }
}

/// Stage spinner, cleared if the stage fails before finishing it.
struct StageSpinner(Option<ProgressBar>);

impl StageSpinner {
    fn start(show: bool, message: &str) -> Self {
        Self(show.then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("{spinner:.green} {msg}")
                    .unwrap_or_else(|_| ProgressStyle::default_spinner()),
            );
            pb.set_message(message.to_string());
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        }))
    }

    fn finish(mut self, message: &str) {
        if let Some(pb) = self.0.take() {
            pb.finish_with_message(message.to_string());
        }
    }
}

impl Drop for StageSpinner {
    fn drop(&mut self) {
        if let Some(pb) = self.0.take() {
            pb.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_path() {
        let options = RunOptions::new("/videos/talk.mkv", "auto", "FR");
        assert_eq!(options.output_path(), PathBuf::from("/videos/talk.fr.mp4"));

        let dubbed = options.clone().with_dub(None);
        assert_eq!(dubbed.output_path(), PathBuf::from("/videos/talk.fr.dub.mp4"));

        let explicit = options.with_output("/tmp/out.mp4");
        assert_eq!(explicit.output_path(), PathBuf::from("/tmp/out.mp4"));
    }

    #[test]
    fn test_stage_error_keeps_stage_failures() {
        let err = stage_error(Stage::Mux, DubsubError::Media("ffmpeg exited 1".into()));
        assert_eq!(err.stage(), Some(Stage::Mux));
        assert_eq!(err.exit_code(), 14);

        let err = stage_error(Stage::Dub, DubsubError::fatal(Stage::Dub, "all failed"));
        assert!(err.to_string().contains("all failed"));

        assert!(matches!(
            stage_error(Stage::Translate, DubsubError::Cancelled),
            DubsubError::Cancelled
        ));
    }

    #[test]
    fn test_abandoned_spinner_is_cleared() {
        let pb = ProgressBar::hidden();
        drop(StageSpinner(Some(pb.clone())));
        assert!(pb.is_finished());

        let pb = ProgressBar::hidden();
        StageSpinner(Some(pb.clone())).finish("done");
        assert!(pb.is_finished());
        assert_eq!(pb.message(), "done");
    }

    #[test]
    fn test_check_cancel() {
        assert!(check_cancel(&AtomicBool::new(false)).is_ok());
        assert!(matches!(
            check_cancel(&AtomicBool::new(true)),
            Err(DubsubError::Cancelled)
        ));
    }
}
