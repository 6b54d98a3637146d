pub mod chat;
pub mod retry;
pub mod stage;

pub use chat::ChatTranslator;
pub use retry::RetryPolicy;
pub use stage::{TranslationOptions, TranslationOutcome, TranslationStage};

use crate::error::CapabilityResult;
use async_trait::async_trait;

/// Machine translation capability.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(&self, text: &str, source: &str, target: &str) -> CapabilityResult<String>;

    /// Translate several texts in one call. The result has exactly one entry
    /// per input, in input order.
    async fn translate_batch(
        &self,
        texts: &[&str],
        source: &str,
        target: &str,
    ) -> CapabilityResult<Vec<String>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.translate(text, source, target).await?);
        }
        Ok(out)
    }

    /// Whether `translate_batch` is cheaper than one call per text.
    fn supports_batch(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str;

    /// Model identifier; part of the translation artifact's signature.
    fn model(&self) -> &str {
        self.name()
    }
}
