use crate::cache::{CacheKey, TranslationCache};
use crate::config::Config;
use crate::error::{CapabilityError, CapabilityResult, CueFailure, DubsubError, Result};
use crate::languages::normalize_code;
use crate::pipeline::Stage;
use crate::subtitle::SubtitleDocument;
use crate::translate::{RetryPolicy, Translator};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct TranslationOptions {
    /// Upper bound on texts per translator call.
    pub batch_size: usize,
    /// Batches in flight at once.
    pub concurrency: usize,
    pub retry: RetryPolicy,
    pub show_progress: bool,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 4,
            retry: RetryPolicy::default(),
            show_progress: false,
        }
    }
}

impl TranslationOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.translation_batch_size,
            concurrency: config.concurrency,
            retry: RetryPolicy::new(
                config.max_attempts,
                Duration::from_millis(config.retry_base_delay_ms),
            ),
            show_progress: false,
        }
    }
}

#[derive(Debug)]
pub struct TranslationOutcome {
    pub document: SubtitleDocument,
    pub failures: Vec<CueFailure>,
    /// Account-level problems (auth, quota) seen during the stage.
    pub warnings: Vec<String>,
    /// Cues answered from the cache without a translator call.
    pub cache_hits: usize,
    /// Cues that received a fresh translation.
    pub translated: usize,
    /// Translator invocations, retries included.
    pub api_calls: usize,
}

impl TranslationOutcome {
    fn unchanged(document: SubtitleDocument) -> Self {
        Self {
            document,
            failures: Vec::new(),
            warnings: Vec::new(),
            cache_hits: 0,
            translated: 0,
            api_calls: 0,
        }
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.cue_index).collect()
    }
}

type KeyResult = (CacheKey, CapabilityResult<String>);

/// Translates every cue of a document through the cache.
pub struct TranslationStage {
    translator: Arc<dyn Translator>,
    cache: Arc<TranslationCache>,
    options: TranslationOptions,
}

impl TranslationStage {
    pub fn new(
        translator: Arc<dyn Translator>,
        cache: Arc<TranslationCache>,
        options: TranslationOptions,
    ) -> Self {
        Self {
            translator,
            cache,
            options,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.options.show_progress = show;
        self
    }

    /// Translate `document` into `target`.
    ///
    /// Each unique cue text is looked up in the cache once; misses are sent
    /// to the translator in batches and stored before they are applied. A
    /// cue that cannot be translated keeps its source text and is reported
    /// in [`TranslationOutcome::failures`]. The stage fails only when every
    /// cue fails or the run is cancelled.
    pub async fn run(
        &self,
        document: SubtitleDocument,
        target: &str,
        cancel: &AtomicBool,
    ) -> Result<TranslationOutcome> {
        if cancel.load(Ordering::SeqCst) {
            return Err(DubsubError::Cancelled);
        }

        let source = normalize_code(document.language());
        let target = normalize_code(target);

        if source == target {
            info!("Source and target language are both '{}', nothing to translate", target);
            return Ok(TranslationOutcome::unchanged(document));
        }
        if document.is_empty() {
            let mut document = document;
            document.set_language(target);
            return Ok(TranslationOutcome::unchanged(document));
        }

        let keys: Vec<CacheKey> = document
            .cues()
            .iter()
            .map(|c| CacheKey::new(&c.text, &source, &target))
            .collect();

        let mut resolved: HashMap<CacheKey, String> = HashMap::new();
        let mut misses: Vec<CacheKey> = Vec::new();
        let mut seen: HashSet<&CacheKey> = HashSet::new();
        for key in &keys {
            if !seen.insert(key) {
                continue;
            }
            match self.cache.get(key) {
                Some(translation) => {
                    resolved.insert(key.clone(), translation);
                }
                None => misses.push(key.clone()),
            }
        }

        let cache_hits = keys.iter().filter(|k| resolved.contains_key(*k)).count();
        info!(
            "Translating {} cues {} -> {}: {} from cache, {} unique texts to translate",
            keys.len(),
            source,
            target,
            cache_hits,
            misses.len()
        );

        let api_calls = Arc::new(AtomicUsize::new(0));
        let failed = self
            .translate_misses(misses, &source, &target, &mut resolved, &api_calls, cancel)
            .await;

        // In-flight calls have landed in the cache; the document is dropped.
        if cancel.load(Ordering::SeqCst) {
            return Err(DubsubError::Cancelled);
        }

        let mut texts = Vec::with_capacity(keys.len());
        let mut failures = Vec::new();
        let mut translated = 0;
        for (cue, key) in document.cues().iter().zip(&keys) {
            if let Some(t) = resolved.get(key) {
                texts.push(t.clone());
                translated += 1;
            } else {
                let error = failed
                    .get(key)
                    .cloned()
                    .unwrap_or_else(|| CapabilityError::Unavailable("not attempted".to_string()));
                failures.push(CueFailure {
                    cue_index: cue.index,
                    error,
                });
                texts.push(cue.text.clone());
            }
        }
        translated -= cache_hits;

        let mut warnings: Vec<String> = Vec::new();
        for error in failed.values().filter(|e| e.is_account_issue()) {
            let message = format!("translation: {}", error);
            if !warnings.contains(&message) {
                warn!("{}", message);
                warnings.push(message);
            }
        }

        if failures.len() == keys.len() {
            let first = failures
                .first()
                .map(|f| f.error.to_string())
                .unwrap_or_default();
            return Err(DubsubError::fatal(
                Stage::Translate,
                format!("all {} cues failed to translate ({})", keys.len(), first),
            ));
        }

        if !failures.is_empty() {
            warn!(
                "{} of {} cues kept their source text",
                failures.len(),
                keys.len()
            );
        }

        let mut document = document;
        document.replace_texts(texts);
        document.set_language(target);

        Ok(TranslationOutcome {
            document,
            failures,
            warnings,
            cache_hits,
            translated,
            api_calls: api_calls.load(Ordering::SeqCst),
        })
    }

    /// Translate deduplicated misses. Successes go into `resolved` (and the
    /// cache); the returned map holds the final error per failed key.
    async fn translate_misses(
        &self,
        misses: Vec<CacheKey>,
        source: &str,
        target: &str,
        resolved: &mut HashMap<CacheKey, String>,
        api_calls: &Arc<AtomicUsize>,
        cancel: &AtomicBool,
    ) -> HashMap<CacheKey, CapabilityError> {
        let mut failed = HashMap::new();
        if misses.is_empty() {
            return failed;
        }

        let batch_size = if self.translator.supports_batch() {
            self.options.batch_size.max(1)
        } else {
            1
        };

        let progress_bar = if self.options.show_progress {
            let pb = ProgressBar::new(misses.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} texts ({eta})")
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let semaphore = Arc::new(Semaphore::new(self.options.concurrency.max(1)));
        let mut futures = FuturesUnordered::new();

        for batch in misses.chunks(batch_size) {
            let batch = batch.to_vec();
            let sem = semaphore.clone();
            let pb = progress_bar.clone();

            futures.push(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return Vec::new();
                };
                if cancel.load(Ordering::SeqCst) {
                    return Vec::new();
                }

                let results = self
                    .translate_batch(batch, source, target, api_calls, cancel)
                    .await;
                if let Some(ref pb) = pb {
                    pb.inc(results.len() as u64);
                }
                results
            });
        }

        while let Some(results) = futures.next().await {
            for (key, result) in results {
                match result {
                    Ok(translation) => {
                        resolved.insert(key, translation);
                    }
                    Err(e) => {
                        failed.insert(key, e);
                    }
                }
            }
        }

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Translation complete");
        }

        failed
    }

    async fn translate_batch(
        &self,
        batch: Vec<CacheKey>,
        source: &str,
        target: &str,
        api_calls: &Arc<AtomicUsize>,
        cancel: &AtomicBool,
    ) -> Vec<KeyResult> {
        let texts: Vec<&str> = batch.iter().map(|k| k.text.as_str()).collect();
        let label = format!("translate batch of {}", texts.len());

        let attempt = self
            .options
            .retry
            .run(&label, || {
                api_calls.fetch_add(1, Ordering::SeqCst);
                self.translator.translate_batch(&texts, source, target)
            })
            .await;

        let error = match attempt {
            Ok(translations) if translations.len() == batch.len() => {
                let pairs: Vec<(CacheKey, String)> =
                    batch.iter().cloned().zip(translations).collect();
                self.cache.put_many(pairs.clone());
                return pairs.into_iter().map(|(k, t)| (k, Ok(t))).collect();
            }
            Ok(translations) => CapabilityError::InvalidResponse(format!(
                "expected {} translations, got {}",
                batch.len(),
                translations.len()
            )),
            Err(e) => e,
        };

        if batch.len() == 1 || matches!(error, CapabilityError::Unauthenticated(_)) {
            return batch.into_iter().map(|k| (k, Err(error.clone()))).collect();
        }

        debug!(
            "Batch of {} failed ({}), retrying item by item",
            batch.len(),
            error
        );

        let mut results = Vec::with_capacity(batch.len());
        for key in batch {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            let result = self
                .options
                .retry
                .run("translate cue", || {
                    api_calls.fetch_add(1, Ordering::SeqCst);
                    self.translator.translate(&key.text, source, target)
                })
                .await;
            if let Ok(ref translation) = result {
                self.cache.put(key.clone(), translation.clone());
            }
            results.push((key, result));
        }
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::subtitle::Cue;
    use async_trait::async_trait;

    struct MockTranslator {
        calls: AtomicUsize,
        fail_on: Option<&'static str>,
        error: CapabilityError,
        batch: bool,
    }

    impl MockTranslator {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_on: None,
                error: CapabilityError::Unavailable("mock".into()),
                batch: true,
            }
        }

        fn failing_on(text: &'static str, error: CapabilityError) -> Self {
            Self {
                fail_on: Some(text),
                error,
                ..Self::new()
            }
        }

        fn render(text: &str, target: &str) -> String {
            match (text, target) {
                ("こんにちは", "fr") => "Bonjour".to_string(),
                _ => format!("[{}] {}", target, text),
            }
        }

        fn fails(&self, text: &str) -> bool {
            self.fail_on.is_some_and(|f| text.contains(f))
        }
    }

    #[async_trait]
    impl Translator for MockTranslator {
        async fn translate(&self, text: &str, _source: &str, target: &str) -> CapabilityResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis((text.len() % 5) as u64)).await;
            if self.fails(text) {
                return Err(self.error.clone());
            }
            Ok(Self::render(text, target))
        }

        async fn translate_batch(
            &self,
            texts: &[&str],
            _source: &str,
            target: &str,
        ) -> CapabilityResult<Vec<String>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if texts.iter().any(|t| self.fails(t)) {
                return Err(self.error.clone());
            }
            Ok(texts.iter().map(|t| Self::render(t, target)).collect())
        }

        fn supports_batch(&self) -> bool {
            self.batch
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    fn doc(lang: &str, texts: &[&str]) -> SubtitleDocument {
        let cues = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                Cue::new(
                    Duration::from_secs(i as u64 * 2),
                    Duration::from_secs(i as u64 * 2 + 1),
                    *t,
                )
            })
            .collect();
        SubtitleDocument::new(lang, cues)
    }

    fn stage(translator: Arc<MockTranslator>, cache: Arc<TranslationCache>) -> TranslationStage {
        let options = TranslationOptions {
            batch_size: 3,
            concurrency: 2,
            retry: RetryPolicy::immediate(2),
            show_progress: false,
        };
        TranslationStage::new(translator, cache, options)
    }

    fn texts(doc: &SubtitleDocument) -> Vec<String> {
        doc.cues().iter().map(|c| c.text.clone()).collect()
    }

    #[tokio::test]
    async fn test_duplicate_text_is_translated_once() {
        let translator = Arc::new(MockTranslator::new());
        let cache = Arc::new(TranslationCache::in_memory());
        let cancel = AtomicBool::new(false);

        let outcome = stage(translator.clone(), cache.clone())
            .run(doc("ja", &["こんにちは", "こんにちは"]), "fr", &cancel)
            .await
            .unwrap();

        assert_eq!(texts(&outcome.document), vec!["Bonjour", "Bonjour"]);
        assert_eq!(outcome.document.language(), "fr");
        assert_eq!(translator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().entry_count, 1);
        assert!(outcome.failures.is_empty());
    }

    #[tokio::test]
    async fn test_second_run_uses_cache_only() {
        let translator = Arc::new(MockTranslator::new());
        let cache = Arc::new(TranslationCache::in_memory());
        let cancel = AtomicBool::new(false);
        let input = doc("en", &["one", "two", "three", "four", "five"]);

        let first = stage(translator.clone(), cache.clone())
            .run(input.clone(), "de", &cancel)
            .await
            .unwrap();
        let calls_after_first = translator.calls.load(Ordering::SeqCst);

        let second = stage(translator.clone(), cache.clone())
            .run(input, "de", &cancel)
            .await
            .unwrap();

        assert_eq!(translator.calls.load(Ordering::SeqCst), calls_after_first);
        assert_eq!(second.api_calls, 0);
        assert_eq!(second.cache_hits, 5);
        assert_eq!(second.document, first.document);
    }

    #[tokio::test]
    async fn test_batches_are_bounded() {
        let translator = Arc::new(MockTranslator::new());
        let cache = Arc::new(TranslationCache::in_memory());
        let cancel = AtomicBool::new(false);
        let input = doc("en", &["a1", "a2", "a3", "a4", "a5", "a6", "a7"]);

        let outcome = stage(translator.clone(), cache)
            .run(input, "fr", &cancel)
            .await
            .unwrap();

        // 7 texts in batches of 3
        assert_eq!(outcome.api_calls, 3);
        assert_eq!(outcome.translated, 7);
    }

    #[tokio::test]
    async fn test_order_and_indices_preserved() {
        let translator = Arc::new(MockTranslator {
            batch: false,
            ..MockTranslator::new()
        });
        let cache = Arc::new(TranslationCache::in_memory());
        let cancel = AtomicBool::new(false);
        let input = doc("en", &["a", "bb", "ccc", "dddd", "eeeee", "ffffff"]);

        let outcome = stage(translator, cache).run(input, "es", &cancel).await.unwrap();

        let indices: Vec<_> = outcome.document.cues().iter().map(|c| c.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(outcome.document.cues()[3].text, "[es] dddd");
    }

    #[tokio::test]
    async fn test_one_bad_cue_does_not_sink_its_batch() {
        let translator = Arc::new(MockTranslator::failing_on(
            "bad",
            CapabilityError::Unavailable("boom".into()),
        ));
        let cache = Arc::new(TranslationCache::in_memory());
        let cancel = AtomicBool::new(false);
        let input = doc("en", &["good one", "bad one", "good two"]);

        let outcome = stage(translator, cache.clone())
            .run(input, "fr", &cancel)
            .await
            .unwrap();

        assert_eq!(outcome.failed_indices(), vec![2]);
        assert_eq!(
            texts(&outcome.document),
            vec!["[fr] good one", "bad one", "[fr] good two"]
        );
        assert_eq!(cache.stats().entry_count, 2);
        assert!(outcome.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_all_failures_are_fatal() {
        let translator = Arc::new(MockTranslator::failing_on(
            "",
            CapabilityError::Unavailable("down".into()),
        ));
        let cache = Arc::new(TranslationCache::in_memory());
        let cancel = AtomicBool::new(false);

        let err = stage(translator, cache)
            .run(doc("en", &["x1", "x2"]), "fr", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.stage(), Some(Stage::Translate));
    }

    #[tokio::test]
    async fn test_account_issue_becomes_warning() {
        let translator = Arc::new(MockTranslator::failing_on(
            "quota",
            CapabilityError::RateLimited("429".into()),
        ));
        let cache = Arc::new(TranslationCache::in_memory());
        let cancel = AtomicBool::new(false);

        let outcome = stage(translator, cache)
            .run(doc("en", &["fine", "quota hit"]), "fr", &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert!(outcome.warnings[0].contains("rate limited"));
        assert_eq!(outcome.failed_indices(), vec![2]);
    }

    #[tokio::test]
    async fn test_same_language_is_untouched() {
        let translator = Arc::new(MockTranslator::new());
        let cache = Arc::new(TranslationCache::in_memory());
        let cancel = AtomicBool::new(false);
        let input = doc("fr", &["Bonjour"]);

        let outcome = stage(translator.clone(), cache)
            .run(input.clone(), "FR", &cancel)
            .await
            .unwrap();
        assert_eq!(outcome.document, input);
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_dispatch() {
        let translator = Arc::new(MockTranslator::new());
        let cache = Arc::new(TranslationCache::in_memory());
        let cancel = AtomicBool::new(true);

        let result = stage(translator.clone(), cache)
            .run(doc("en", &["hello"]), "fr", &cancel)
            .await;
        assert!(matches!(result, Err(DubsubError::Cancelled)));
        assert_eq!(translator.calls.load(Ordering::SeqCst), 0);
    }
}
