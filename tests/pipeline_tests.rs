//! End-to-end pipeline tests with in-process capabilities.

use async_trait::async_trait;
use dubsub::cache::{CacheKey, TranslationCache};
use dubsub::config::Config;
use dubsub::dub::{wav, SynthesizedAudio, Synthesizer, VoiceReference, TRACK_SAMPLE_RATE};
use dubsub::error::{CapabilityError, CapabilityResult, DubsubError, Result};
use dubsub::media::{BackgroundSeparator, MediaTool, MuxRequest};
use dubsub::pipeline::{Capabilities, PipelineOrchestrator, RunOptions, RunReport, Stage, StageStatus};
use dubsub::subtitle::{srt, Cue};
use dubsub::transcribe::{Transcriber, Transcript};
use dubsub::translate::Translator;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

const VIDEO_SECONDS: u64 = 4;

// ============================================================================
// Mock capabilities
// ============================================================================

#[derive(Default)]
struct MockMedia {
    extracts: AtomicUsize,
    muxes: Mutex<Vec<(PathBuf, bool, String)>>,
    /// Background track and burn-in flag of each mux.
    mux_layouts: Mutex<Vec<(Option<PathBuf>, bool)>>,
}

#[async_trait]
impl MediaTool for MockMedia {
    async fn extract_audio(&self, _video: &Path, output: &Path) -> Result<()> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        wav::write(output, &vec![0.0; 16_000 * VIDEO_SECONDS as usize], 16_000)
    }

    async fn probe_duration(&self, _media: &Path) -> Result<Duration> {
        Ok(Duration::from_secs(VIDEO_SECONDS))
    }

    async fn mux(&self, request: &MuxRequest<'_>) -> Result<()> {
        let subtitles = std::fs::read(request.subtitles)?;
        std::fs::write(request.output, subtitles)?;
        self.muxes.lock().unwrap().push((
            request.output.to_path_buf(),
            request.dub.is_some(),
            request.language.to_string(),
        ));
        self.mux_layouts.lock().unwrap().push((
            request.background.map(Path::to_path_buf),
            request.burn_subtitles,
        ));
        Ok(())
    }
}

#[derive(Default)]
struct MockTranscriber {
    calls: AtomicUsize,
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(&self, _audio: &Path, _hint: Option<&str>) -> CapabilityResult<Transcript> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let cue = |start: u64, end: u64, text: &str| {
            Cue::new(Duration::from_millis(start), Duration::from_millis(end), text)
        };
        Ok(Transcript {
            language: Some("Japanese".to_string()),
            cues: vec![
                cue(0, 1000, "こんにちは"),
                cue(1500, 2500, "ありがとうございます"),
                cue(3000, 3800, "こんにちは"),
            ],
        })
    }

    fn name(&self) -> &'static str {
        "mock-transcriber"
    }

    fn model(&self) -> &str {
        "mock-model"
    }
}

struct MockTranslator {
    calls: AtomicUsize,
    fail_on: Mutex<Option<String>>,
}

impl MockTranslator {
    fn new(fail_on: Option<&str>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Mutex::new(fail_on.map(str::to_string)),
        }
    }

    fn heal(&self) {
        *self.fail_on.lock().unwrap() = None;
    }
}

#[async_trait]
impl Translator for MockTranslator {
    async fn translate(&self, text: &str, _source: &str, target: &str) -> CapabilityResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let fail_on = self.fail_on.lock().unwrap().clone();
        if fail_on.is_some_and(|f| f.is_empty() || text.contains(&f)) {
            return Err(CapabilityError::Unavailable("translator down".into()));
        }
        let dictionary: HashMap<&str, &str> = [
            ("こんにちは", "Bonjour"),
            ("ありがとうございます", "Merci beaucoup"),
        ]
        .into_iter()
        .collect();
        Ok(match (target, dictionary.get(text)) {
            ("fr", Some(t)) => t.to_string(),
            ("it", _) => format!("Ciao\n\n{text}"),
            _ => format!("[{target}] {text}"),
        })
    }

    fn name(&self) -> &'static str {
        "mock-translator"
    }
}

#[derive(Default)]
struct MockSynthesizer {
    calls: AtomicUsize,
}

#[async_trait]
impl Synthesizer for MockSynthesizer {
    async fn synthesize(
        &self,
        _text: &str,
        _language: &str,
        _voice_ref: Option<&VoiceReference>,
    ) -> CapabilityResult<SynthesizedAudio> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SynthesizedAudio {
            samples: vec![0.4; 8_000],
            sample_rate: 16_000,
        })
    }

    fn name(&self) -> &'static str {
        "mock-synthesizer"
    }
}

#[derive(Default)]
struct MockSeparator {
    calls: AtomicUsize,
    fail: AtomicBool,
}

#[async_trait]
impl BackgroundSeparator for MockSeparator {
    async fn separate(&self, _audio: &Path, output: &Path) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(DubsubError::Media("demucs exited 1".into()));
        }
        wav::write(output, &vec![0.1; 16_000 * VIDEO_SECONDS as usize], 16_000)
    }

    fn name(&self) -> &'static str {
        "mock-separator"
    }
}

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    dir: TempDir,
    input: PathBuf,
    media: Arc<MockMedia>,
    transcriber: Arc<MockTranscriber>,
    translator: Arc<MockTranslator>,
    synthesizer: Arc<MockSynthesizer>,
    separator: Arc<MockSeparator>,
    cache: Arc<TranslationCache>,
}

impl Fixture {
    fn new(translator: MockTranslator) -> Self {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("episode.mp4");
        std::fs::write(&input, b"not really a video").unwrap();
        Self {
            dir,
            input,
            media: Arc::new(MockMedia::default()),
            transcriber: Arc::new(MockTranscriber::default()),
            translator: Arc::new(translator),
            synthesizer: Arc::new(MockSynthesizer::default()),
            separator: Arc::new(MockSeparator::default()),
            cache: Arc::new(TranslationCache::in_memory()),
        }
    }

    fn orchestrator(&self) -> PipelineOrchestrator {
        let config = Config {
            max_attempts: 1,
            retry_base_delay_ms: 0,
            concurrency: 2,
            ..Config::default()
        };
        let capabilities = Capabilities {
            media: self.media.clone(),
            transcriber: self.transcriber.clone(),
            translator: self.translator.clone(),
            synthesizer: Some(self.synthesizer.clone()),
            separator: Some(self.separator.clone()),
        };
        PipelineOrchestrator::new(capabilities, self.cache.clone(), config)
    }

    fn options(&self, target: &str) -> RunOptions {
        RunOptions::new(&self.input, "auto", target)
            .with_work_dir(self.dir.path().join("work"))
            .with_output(self.dir.path().join(format!("episode.{target}.mp4")))
    }

    async fn run(&self, options: &RunOptions) -> RunReport {
        self.orchestrator().run(options, &AtomicBool::new(false)).await
    }

    fn translator_calls(&self) -> usize {
        self.translator.calls.load(Ordering::SeqCst)
    }

    fn transcriber_calls(&self) -> usize {
        self.transcriber.calls.load(Ordering::SeqCst)
    }

    fn extracts(&self) -> usize {
        self.media.extracts.load(Ordering::SeqCst)
    }
}

fn texts(path: &Path, language: &str) -> Vec<String> {
    srt::read(path, language)
        .unwrap()
        .cues()
        .iter()
        .map(|c| c.text.clone())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_run_translates_and_muxes() {
    let fx = Fixture::new(MockTranslator::new(None));
    let report = fx.run(&fx.options("fr")).await;

    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.source_language.as_deref(), Some("ja"));
    assert_eq!(report.run.status(Stage::Extract), StageStatus::Done);
    assert_eq!(report.run.status(Stage::Transcribe), StageStatus::Done);
    assert_eq!(report.run.status(Stage::Translate), StageStatus::Done);
    assert_eq!(report.run.status(Stage::Dub), StageStatus::Skipped);
    assert_eq!(report.run.status(Stage::Mux), StageStatus::Done);

    let subtitles = report.subtitles.clone().unwrap();
    assert_eq!(
        texts(&subtitles, "fr"),
        vec!["Bonjour", "Merci beaucoup", "Bonjour"]
    );
    // One call per unique text.
    assert_eq!(fx.translator_calls(), 2);

    let muxes = fx.media.muxes.lock().unwrap().clone();
    assert_eq!(muxes.len(), 1);
    assert_eq!(muxes[0].0, fx.dir.path().join("episode.fr.mp4"));
    assert!(!muxes[0].1);
    assert_eq!(muxes[0].2, "fr");
    assert_eq!(report.output, Some(fx.dir.path().join("episode.fr.mp4")));
}

#[tokio::test]
async fn test_rerun_reuses_every_stage() {
    let fx = Fixture::new(MockTranslator::new(None));
    let options = fx.options("fr");

    let first = fx.run(&options).await;
    assert!(first.is_success());
    let subtitles = first.subtitles.clone().unwrap();
    let before = std::fs::read(&subtitles).unwrap();

    let second = fx.run(&options).await;
    assert!(second.is_success(), "{:?}", second.error);
    for stage in [Stage::Extract, Stage::Transcribe, Stage::Translate, Stage::Mux] {
        assert_eq!(second.run.status(stage), StageStatus::Reused, "{stage}");
    }
    assert_eq!(fx.extracts(), 1);
    assert_eq!(fx.transcriber_calls(), 1);
    assert_eq!(fx.translator_calls(), 2);
    assert_eq!(fx.media.muxes.lock().unwrap().len(), 1);
    assert_eq!(std::fs::read(&subtitles).unwrap(), before);
}

#[tokio::test]
async fn test_rerun_after_translate_failure_skips_transcription() {
    let fx = Fixture::new(MockTranslator::new(Some("")));
    let options = fx.options("fr");

    let failed = fx.run(&options).await;
    assert_eq!(failed.exit_code(), 12);
    assert_eq!(failed.run.failed_stage(), Some(Stage::Translate));
    assert_eq!(failed.run.status(Stage::Transcribe), StageStatus::Done);
    assert!(failed.output.is_none());

    fx.translator.heal();
    let resumed = fx.run(&options).await;
    assert!(resumed.is_success(), "{:?}", resumed.error);
    assert_eq!(resumed.run.status(Stage::Extract), StageStatus::Reused);
    assert_eq!(resumed.run.status(Stage::Transcribe), StageStatus::Reused);
    assert_eq!(resumed.run.status(Stage::Translate), StageStatus::Done);
    assert_eq!(fx.extracts(), 1);
    assert_eq!(fx.transcriber_calls(), 1);
    assert_eq!(
        texts(&resumed.subtitles.unwrap(), "fr"),
        vec!["Bonjour", "Merci beaucoup", "Bonjour"]
    );
}

#[tokio::test]
async fn test_partial_failure_flags_one_cue_and_retries_it_next_run() {
    let fx = Fixture::new(MockTranslator::new(Some("ありがとう")));
    let options = fx.options("fr");

    let report = fx.run(&options).await;
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.translation_failures.len(), 1);
    assert_eq!(report.translation_failures[0].cue_index, 2);
    assert_eq!(
        texts(report.subtitles.as_ref().unwrap(), "fr"),
        vec!["Bonjour", "ありがとうございます", "Bonjour"]
    );
    assert_eq!(fx.translator_calls(), 2);

    // The translation was not recorded, so it runs again; only the missing
    // text reaches the translator.
    fx.translator.heal();
    let rerun = fx.run(&options).await;
    assert_eq!(rerun.run.status(Stage::Translate), StageStatus::Done);
    assert!(rerun.translation_failures.is_empty());
    assert_eq!(fx.translator_calls(), 3);
    assert_eq!(rerun.cache_hits, 2);
}

#[tokio::test]
async fn test_new_target_reuses_transcript() {
    let fx = Fixture::new(MockTranslator::new(None));

    assert!(fx.run(&fx.options("fr")).await.is_success());
    let spanish = fx.run(&fx.options("es")).await;

    assert!(spanish.is_success(), "{:?}", spanish.error);
    assert_eq!(spanish.run.status(Stage::Transcribe), StageStatus::Reused);
    assert_eq!(spanish.run.status(Stage::Translate), StageStatus::Done);
    assert_eq!(fx.transcriber_calls(), 1);
    assert_eq!(
        texts(spanish.subtitles.as_ref().unwrap(), "es")[0],
        "[es] こんにちは"
    );
}

#[tokio::test]
async fn test_dub_track_covers_video_duration() {
    let fx = Fixture::new(MockTranslator::new(None));
    let options = fx.options("fr").with_dub(None);

    let report = fx.run(&options).await;
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.run.status(Stage::Dub), StageStatus::Done);
    assert!(report.synthesis_failures.is_empty());
    assert_eq!(fx.synthesizer.calls.load(Ordering::SeqCst), 3);

    let track = report.dub_track.clone().unwrap();
    let audio = tokio_test::assert_ok!(wav::read(&track));
    assert_eq!(audio.sample_rate, TRACK_SAMPLE_RATE);
    assert_eq!(
        audio.samples.len(),
        (VIDEO_SECONDS as usize) * TRACK_SAMPLE_RATE as usize
    );

    let muxes = fx.media.muxes.lock().unwrap().clone();
    assert!(muxes[0].1, "dubbed mux must carry the dub track");

    let again = fx.run(&options).await;
    assert_eq!(again.run.status(Stage::Dub), StageStatus::Reused);
    assert_eq!(fx.synthesizer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_background_mixed_under_dub_and_reused() {
    let fx = Fixture::new(MockTranslator::new(None));
    let options = fx.options("fr").with_dub(None).with_background(true);

    let report = fx.run(&options).await;
    assert!(report.is_success(), "{:?}", report.error);
    let background = report.background.clone().unwrap();
    assert!(wav::is_valid(&background));
    assert_eq!(fx.separator.calls.load(Ordering::SeqCst), 1);

    let layouts = fx.media.mux_layouts.lock().unwrap().clone();
    assert_eq!(layouts, vec![(Some(background.clone()), false)]);

    let again = fx.run(&options).await;
    assert_eq!(again.run.status(Stage::Dub), StageStatus::Reused);
    assert_eq!(again.run.status(Stage::Mux), StageStatus::Reused);
    assert_eq!(again.background, Some(background));
    assert_eq!(fx.separator.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_separation_keeps_dub_without_background() {
    let fx = Fixture::new(MockTranslator::new(None));
    fx.separator.fail.store(true, Ordering::SeqCst);
    let options = fx.options("fr").with_dub(None).with_background(true);

    let report = fx.run(&options).await;
    assert!(report.is_success(), "{:?}", report.error);
    assert!(report.background.is_none());
    assert!(report.warnings.iter().any(|w| w.contains("background separation failed")));
    assert_eq!(fx.media.mux_layouts.lock().unwrap()[0], (None, false));

    // The dub is reused; separation is attempted again and the video remuxed.
    fx.separator.fail.store(false, Ordering::SeqCst);
    let again = fx.run(&options).await;
    assert_eq!(again.run.status(Stage::Dub), StageStatus::Reused);
    assert_eq!(again.run.status(Stage::Mux), StageStatus::Done);
    assert!(again.background.is_some());
    assert_eq!(fx.synthesizer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_burned_subtitles_change_mux_signature() {
    let fx = Fixture::new(MockTranslator::new(None));

    assert!(fx.run(&fx.options("fr")).await.is_success());
    let burned = fx.run(&fx.options("fr").with_burn_subs(true)).await;

    assert!(burned.is_success(), "{:?}", burned.error);
    assert_eq!(burned.run.status(Stage::Translate), StageStatus::Reused);
    assert_eq!(burned.run.status(Stage::Mux), StageStatus::Done);
    let layouts = fx.media.mux_layouts.lock().unwrap().clone();
    assert_eq!(layouts, vec![(None, false), (None, true)]);
}

#[tokio::test]
async fn test_multi_paragraph_translation_reused_intact() {
    let fx = Fixture::new(MockTranslator::new(None));
    let options = fx.options("it");

    let first = fx.run(&options).await;
    assert!(first.is_success(), "{:?}", first.error);
    let written = texts(first.subtitles.as_ref().unwrap(), "it");
    assert_eq!(written.len(), 3);
    assert_eq!(written[0], "Ciao\nこんにちは");

    let again = fx.run(&options).await;
    assert_eq!(again.run.status(Stage::Translate), StageStatus::Reused);
    assert_eq!(texts(again.subtitles.as_ref().unwrap(), "it"), written);
}

#[tokio::test]
async fn test_subs_only_skips_mux() {
    let fx = Fixture::new(MockTranslator::new(None));
    let report = fx.run(&fx.options("fr").with_subs_only(true)).await;

    assert!(report.is_success());
    assert_eq!(report.run.status(Stage::Mux), StageStatus::Skipped);
    assert!(report.output.is_none());
    assert!(fx.media.muxes.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_cancelled_run_does_no_work() {
    let fx = Fixture::new(MockTranslator::new(None));
    let report = fx
        .orchestrator()
        .run(&fx.options("fr"), &AtomicBool::new(true))
        .await;

    assert!(matches!(report.error, Some(DubsubError::Cancelled)));
    assert_eq!(report.exit_code(), 130);
    assert_eq!(fx.extracts(), 0);
}

#[tokio::test]
async fn test_invalid_options_fail_before_any_stage() {
    let fx = Fixture::new(MockTranslator::new(None));

    let missing = RunOptions::new(fx.dir.path().join("missing.mp4"), "auto", "fr");
    let report = fx.run(&missing).await;
    assert!(matches!(report.error, Some(DubsubError::FileNotFound(_))));
    assert_eq!(report.exit_code(), 2);

    let report = fx.run(&fx.options("auto")).await;
    assert!(matches!(report.error, Some(DubsubError::Configuration(_))));

    let report = fx.run(&fx.options("fr").with_background(true)).await;
    assert!(matches!(report.error, Some(DubsubError::Configuration(_))));

    let report = fx
        .run(&fx.options("fr").with_subs_only(true).with_burn_subs(true))
        .await;
    assert!(matches!(report.error, Some(DubsubError::Configuration(_))));

    assert_eq!(fx.extracts(), 0);
}

#[tokio::test]
async fn test_translations_persist_in_cache_file() {
    let fx = Fixture::new(MockTranslator::new(None));
    let cache_path = fx.dir.path().join("cache").join("translations.json");

    let cache = Arc::new(TranslationCache::open(&cache_path));
    let capabilities = Capabilities {
        media: fx.media.clone(),
        transcriber: fx.transcriber.clone(),
        translator: fx.translator.clone(),
        synthesizer: None,
        separator: None,
    };
    let orchestrator = PipelineOrchestrator::new(capabilities, cache, Config::default());
    let report = orchestrator
        .run(&fx.options("fr"), &AtomicBool::new(false))
        .await;
    assert!(report.is_success(), "{:?}", report.error);
    assert_eq!(report.cache_stats.entry_count, 2);

    let reopened = TranslationCache::open(&cache_path);
    assert_eq!(
        reopened.get(&CacheKey::new("  こんにちは ", "ja", "fr")).as_deref(),
        Some("Bonjour")
    );
}
