// SRT subtitle format
use super::{tidy_text, Cue, SubtitleDocument};
use crate::error::{DubsubError, Result};
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

fn timing_regex() -> &'static Regex {
    static TIMING: OnceLock<Regex> = OnceLock::new();
    TIMING.get_or_init(|| {
        Regex::new(
            r"^(\d+):(\d{2}):(\d{2})[,.](\d{3})\s*-->\s*(\d+):(\d{2}):(\d{2})[,.](\d{3})",
        )
        .expect("Invalid regex")
    })
}

/// Parse SRT content into a document tagged with `language`.
///
/// Blocks without a readable timing line are skipped. Content that is not
/// blank but yields no cue at all is an error, so a truncated or foreign file
/// is never mistaken for an empty transcript.
pub fn parse(content: &str, language: &str) -> Result<SubtitleDocument> {
    let content = content.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    let mut cues = Vec::new();
    let mut skipped = 0usize;

    for block in content.split("\n\n") {
        let lines: Vec<&str> = block
            .lines()
            .map(str::trim_end)
            .skip_while(|l| l.trim().is_empty())
            .collect();
        if lines.is_empty() {
            continue;
        }

        // The index line is optional; some writers omit it.
        let timing_at = if lines[0].contains("-->") { 0 } else { 1 };
        let Some(timing) = lines.get(timing_at) else {
            skipped += 1;
            continue;
        };
        let Some((start, end)) = parse_timing(timing) else {
            skipped += 1;
            continue;
        };

        let text = lines[timing_at + 1..]
            .iter()
            .map(|l| l.trim())
            .collect::<Vec<_>>()
            .join("\n");
        cues.push(Cue::new(start, end, text));
    }

    if cues.is_empty() && skipped > 0 {
        return Err(DubsubError::SubtitleParse(format!(
            "no readable cue in {} block(s)",
            skipped
        )));
    }

    Ok(SubtitleDocument::new(language, cues))
}

fn parse_timing(line: &str) -> Option<(Duration, Duration)> {
    let caps = timing_regex().captures(line.trim())?;
    let field = |i: usize| caps.get(i).and_then(|m| m.as_str().parse::<u64>().ok());
    let start = to_duration(field(1)?, field(2)?, field(3)?, field(4)?);
    let end = to_duration(field(5)?, field(6)?, field(7)?, field(8)?);
    Some((start, end))
}

fn to_duration(hours: u64, minutes: u64, seconds: u64, millis: u64) -> Duration {
    Duration::from_millis(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

/// Serialize a document as SRT. Blank lines inside cue text are dropped so
/// every cue stays one block.
pub fn format(doc: &SubtitleDocument) -> String {
    doc.cues()
        .iter()
        .map(|cue| {
            format!(
                "{}\n{} --> {}\n{}\n\n",
                cue.index,
                format_timestamp(cue.start),
                format_timestamp(cue.end),
                tidy_text(&cue.text)
            )
        })
        .collect()
}

pub fn format_timestamp(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = d.subsec_millis();
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

pub fn read(path: &Path, language: &str) -> Result<SubtitleDocument> {
    let content = std::fs::read_to_string(path)?;
    parse(&content, language)
}
