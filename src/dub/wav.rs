//! WAV decoding/encoding and sample-rate conversion.

use super::SynthesizedAudio;
use crate::error::Result;
use crate::storage::write_atomic;
use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::io::{Cursor, Read};
use std::path::Path;

pub fn read(path: &Path) -> Result<SynthesizedAudio> {
    from_reader(WavReader::open(path)?)
}

pub fn decode(bytes: &[u8]) -> Result<SynthesizedAudio> {
    from_reader(WavReader::new(Cursor::new(bytes))?)
}

fn from_reader<R: Read>(reader: WavReader<R>) -> Result<SynthesizedAudio> {
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .into_samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
        SampleFormat::Float => reader
            .into_samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
    };

    Ok(SynthesizedAudio {
        samples: to_mono(&interleaved, spec.channels),
        sample_rate: spec.sample_rate,
    })
}

/// Encode mono samples as 16-bit PCM.
pub fn encode(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = WavWriter::new(&mut cursor, spec)?;
        for &s in samples {
            writer.write_sample((s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;
    }
    Ok(cursor.into_inner())
}

/// Write mono samples to `path`, replacing any existing file atomically.
pub fn write(path: &Path, samples: &[f32], sample_rate: u32) -> Result<()> {
    let bytes = encode(samples, sample_rate)?;
    write_atomic(path, &bytes)?;
    Ok(())
}

/// True when `path` is a WAV file hound can open.
pub fn is_valid(path: &Path) -> bool {
    WavReader::open(path).is_ok()
}

/// Average interleaved channels down to mono.
pub fn to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

/// Resample to `output_len` samples by linear interpolation.
///
/// Used both for rate conversion and for speeding a clip up.
pub fn stretch(samples: &[f32], output_len: usize) -> Vec<f32> {
    if samples.is_empty() || output_len == 0 {
        return Vec::new();
    }
    if output_len == samples.len() {
        return samples.to_vec();
    }

    let step = samples.len() as f64 / output_len as f64;
    (0..output_len)
        .map(|i| {
            let src_pos = i as f64 * step;
            let idx = src_pos as usize;
            let frac = (src_pos - idx as f64) as f32;
            if idx + 1 < samples.len() {
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            } else {
                samples[samples.len() - 1]
            }
        })
        .collect()
}

/// Convert `audio` to `target_rate`.
pub fn resample(audio: &SynthesizedAudio, target_rate: u32) -> Vec<f32> {
    if audio.sample_rate == target_rate || audio.sample_rate == 0 {
        return audio.samples.clone();
    }
    let output_len =
        (audio.samples.len() as f64 * target_rate as f64 / audio.sample_rate as f64).round() as usize;
    stretch(&audio.samples, output_len)
}
