//! Placing synthesized clips on the dub timeline.
//!
//! A clip always starts at its cue's start. A clip longer than the cue
//! window is first sped up (at most `max_speed_ratio`), then allowed to run
//! into the silence before the next cue, and finally cut at the next cue's
//! start. Clips therefore never overlap each other.

use super::wav::stretch;
use std::time::Duration;
use tracing::debug;

/// Peak level the assembled track is scaled to when it clips.
pub const NORMALIZED_PEAK: f32 = 0.9;

/// One cue's synthesized audio, at the track sample rate.
#[derive(Debug, Clone)]
pub struct DubSegment {
    pub cue_index: usize,
    pub target_start: Duration,
    pub window_end: Duration,
    /// Empty for a cue whose synthesis failed.
    pub samples: Vec<f32>,
    pub natural_duration: Duration,
}

/// How a clip was made to fit its slot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fit {
    /// Shorter than the window; followed by silence.
    Natural,
    /// Compressed by the given ratio to end with the window.
    SpedUp(f64),
    /// Compressed by the maximum ratio and running into the gap after the
    /// window.
    Overlapped,
    /// Cut at the next cue's start (or the end of the track).
    Truncated,
    /// Nothing to place.
    Silent,
}

#[derive(Debug, Clone)]
pub struct PlacedSegment {
    pub cue_index: usize,
    pub start_sample: usize,
    pub samples: Vec<f32>,
    pub fit: Fit,
}

impl PlacedSegment {
    pub fn end_sample(&self) -> usize {
        self.start_sample + self.samples.len()
    }
}

pub fn samples_for(duration: Duration, sample_rate: u32) -> usize {
    (duration.as_secs_f64() * sample_rate as f64).round() as usize
}

/// Fit every segment into its slot. `track_len` bounds the last one.
pub fn place_segments(
    mut segments: Vec<DubSegment>,
    sample_rate: u32,
    track_len: Duration,
    max_speed_ratio: f64,
) -> Vec<PlacedSegment> {
    segments.sort_by_key(|s| s.target_start);
    let max_speed_ratio = max_speed_ratio.max(1.0);
    let track_samples = samples_for(track_len, sample_rate);

    let limits: Vec<usize> = (0..segments.len())
        .map(|i| {
            segments
                .get(i + 1)
                .map(|next| samples_for(next.target_start, sample_rate))
                .unwrap_or(track_samples)
                .min(track_samples)
        })
        .collect();

    segments
        .into_iter()
        .zip(limits)
        .map(|(segment, limit)| place_one(segment, sample_rate, limit, max_speed_ratio))
        .collect()
}

fn place_one(
    segment: DubSegment,
    sample_rate: u32,
    limit: usize,
    max_speed_ratio: f64,
) -> PlacedSegment {
    let start_sample = samples_for(segment.target_start, sample_rate);
    let window = samples_for(
        segment.window_end.saturating_sub(segment.target_start),
        sample_rate,
    );
    let room = limit.saturating_sub(start_sample);
    let natural = segment.samples.len();

    let (mut samples, mut fit) = if natural == 0 {
        (Vec::new(), Fit::Silent)
    } else if natural <= window {
        (segment.samples, Fit::Natural)
    } else {
        let needed = natural as f64 / window.max(1) as f64;
        if needed <= max_speed_ratio {
            (stretch(&segment.samples, window), Fit::SpedUp(needed))
        } else {
            let len = (natural as f64 / max_speed_ratio).ceil() as usize;
            (stretch(&segment.samples, len), Fit::Overlapped)
        }
    };

    if samples.len() > room {
        samples.truncate(room);
        fit = Fit::Truncated;
    }

    if fit != Fit::Natural && fit != Fit::Silent {
        debug!(
            "Cue {}: {:?}, natural {:.2}s",
            segment.cue_index,
            fit,
            segment.natural_duration.as_secs_f64()
        );
    }

    PlacedSegment {
        cue_index: segment.cue_index,
        start_sample,
        samples,
        fit,
    }
}

/// Mix placed segments into a silent track of exactly `total_samples`.
pub fn assemble(placed: &[PlacedSegment], total_samples: usize) -> Vec<f32> {
    let mut track = vec![0.0f32; total_samples];
    for segment in placed {
        if segment.start_sample >= total_samples {
            continue;
        }
        let end = segment.end_sample().min(total_samples);
        let slot = &mut track[segment.start_sample..end];
        for (out, s) in slot.iter_mut().zip(&segment.samples) {
            *out += s;
        }
    }
    normalize_peak(&mut track);
    track
}

/// Scale the track down to [`NORMALIZED_PEAK`] if it exceeds full scale.
pub fn normalize_peak(samples: &mut [f32]) {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    if peak > 1.0 {
        let gain = NORMALIZED_PEAK / peak;
        samples.iter_mut().for_each(|s| *s *= gain);
    }
}
