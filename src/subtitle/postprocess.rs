use super::SubtitleDocument;
use std::collections::HashMap;
use tracing::debug;

/// Outro phrases speech models tend to invent over silence or music.
const HALLUCINATION_PATTERNS: [&str; 8] = [
    "ご視聴ありがとうございました",
    "チャンネル登録",
    "いいねボタン",
    "thanks for watching",
    "please subscribe",
    "like and subscribe",
    "merci d'avoir regardé",
    "abonnez-vous",
];

/// Configuration for dropping hallucinated transcript cues.
#[derive(Debug, Clone)]
pub struct HallucinationFilter {
    /// Cues shorter than this many characters are dropped.
    pub min_chars: usize,
    /// Identical text appearing more than this many times is dropped.
    pub max_repeats: usize,
}

impl Default for HallucinationFilter {
    fn default() -> Self {
        Self {
            min_chars: 3,
            max_repeats: 2,
        }
    }
}

impl HallucinationFilter {
    fn is_hallucination(&self, text: &str, counts: &HashMap<String, usize>) -> bool {
        let trimmed = text.trim();
        if trimmed.chars().count() < self.min_chars {
            return true;
        }

        let lower = trimmed.to_lowercase();
        if HALLUCINATION_PATTERNS.iter().any(|p| lower.contains(p)) {
            return true;
        }

        counts.get(trimmed).copied().unwrap_or(0) > self.max_repeats
    }
}

/// Drop hallucinated cues and renumber. Returns the number removed.
pub fn filter_hallucinations(doc: &mut SubtitleDocument, filter: &HallucinationFilter) -> usize {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for cue in doc.cues() {
        *counts.entry(cue.text.trim().to_string()).or_insert(0) += 1;
    }

    let before = doc.len();
    doc.retain(|cue| !filter.is_hallucination(&cue.text, &counts));
    let removed = before - doc.len();

    if removed > 0 {
        debug!("Removed {} hallucinated cue(s)", removed);
    }
    removed
}
