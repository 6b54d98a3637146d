pub mod postprocess;
pub mod srt;

pub use postprocess::{filter_hallucinations, HallucinationFilter};

use std::time::Duration;
use tracing::debug;

/// One timed subtitle entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    /// 1-based position, re-derived by [`SubtitleDocument`].
    pub index: usize,
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

impl Cue {
    pub fn new(start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            index: 0,
            start,
            end,
            text: text.into(),
        }
    }

    /// Length of the cue's display window.
    pub fn window(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// Trim every line of a cue's text and drop blank lines. A blank line ends
/// an SRT block, so cue text must never contain one.
pub fn tidy_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Ordered cues plus the language they are written in.
///
/// Construction sorts cues by start time, drops cues with an empty window or
/// empty text, and renumbers the rest `1..=N`. Indices coming from a parser
/// or a provider are never trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleDocument {
    language: String,
    cues: Vec<Cue>,
}

impl SubtitleDocument {
    pub fn new(language: impl Into<String>, cues: Vec<Cue>) -> Self {
        let mut doc = Self {
            language: language.into(),
            cues,
        };
        doc.normalize();
        doc
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn set_language(&mut self, language: impl Into<String>) {
        self.language = language.into();
    }

    pub fn cues(&self) -> &[Cue] {
        &self.cues
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn into_cues(self) -> Vec<Cue> {
        self.cues
    }

    /// End of the last cue.
    pub fn duration(&self) -> Duration {
        self.cues.iter().map(|c| c.end).max().unwrap_or(Duration::ZERO)
    }

    /// Replace cue texts in order. `texts` must have one entry per cue.
    pub fn replace_texts(&mut self, texts: Vec<String>) {
        debug_assert_eq!(texts.len(), self.cues.len());
        for (cue, text) in self.cues.iter_mut().zip(texts) {
            cue.text = tidy_text(&text);
        }
    }

    /// Keep only the cues matching `keep`, then renumber.
    pub fn retain(&mut self, keep: impl FnMut(&Cue) -> bool) {
        self.cues.retain(keep);
        self.reindex();
    }

    fn normalize(&mut self) {
        for cue in &mut self.cues {
            cue.text = tidy_text(&cue.text);
        }
        let before = self.cues.len();
        self.cues.retain(|c| c.start < c.end && !c.text.trim().is_empty());
        if self.cues.len() != before {
            debug!(
                "Dropped {} cue(s) with empty window or text",
                before - self.cues.len()
            );
        }
        // Stable: cues sharing a start keep their relative order.
        self.cues.sort_by_key(|c| c.start);
        self.reindex();
    }

    fn reindex(&mut self) {
        for (i, cue) in self.cues.iter_mut().enumerate() {
            cue.index = i + 1;
        }
    }
}
