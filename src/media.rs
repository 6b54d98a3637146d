//! Demux/mux through FFmpeg.

use crate::config::Config;
use crate::error::{DubsubError, Result};
use crate::languages::{iso639_2, language_name};
use crate::storage::write_atomic;
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Inputs of a mux step.
#[derive(Debug, Clone)]
pub struct MuxRequest<'a> {
    pub video: &'a Path,
    pub subtitles: &'a Path,
    /// Replaces the original audio when present.
    pub dub: Option<&'a Path>,
    /// Music and ambience mixed under the dub.
    pub background: Option<&'a Path>,
    /// Render the subtitles into the picture instead of adding a track.
    pub burn_subtitles: bool,
    pub language: &'a str,
    pub output: &'a Path,
}

/// Media demux/mux capability.
#[async_trait]
pub trait MediaTool: Send + Sync {
    /// Extract the audio track as 16 kHz mono 16-bit WAV.
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()>;

    async fn probe_duration(&self, media: &Path) -> Result<Duration>;

    async fn mux(&self, request: &MuxRequest<'_>) -> Result<()>;
}

pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new("ffmpeg", "ffprobe")
    }
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.ffmpeg_binary, &config.ffprobe_binary)
    }

    /// Check that both binaries can be executed.
    pub async fn check(&self) -> Result<()> {
        for binary in [&self.ffmpeg, &self.ffprobe] {
            let output = Command::new(binary)
                .arg("-version")
                .output()
                .await
                .map_err(|e| {
                    DubsubError::Media(format!(
                        "{} not found. Please install FFmpeg and ensure it's in your PATH. Error: {e}",
                        binary.display()
                    ))
                })?;
            if !output.status.success() {
                return Err(DubsubError::Media(format!(
                    "{} -version failed",
                    binary.display()
                )));
            }
        }
        debug!("FFmpeg is available");
        Ok(())
    }

    async fn run_ffmpeg(&self, args: Vec<OsString>) -> Result<()> {
        debug!("Running {} {:?}", self.ffmpeg.display(), args);
        let output = Command::new(&self.ffmpeg)
            .args(&args)
            .output()
            .await
            .map_err(|e| DubsubError::Media(format!("Failed to run FFmpeg: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(DubsubError::Media(format!(
                "FFmpeg failed: {}",
                tail.into_iter().rev().collect::<Vec<_>>().join("\n")
            )));
        }
        Ok(())
    }
}

pub fn extract_args(video: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), video.into()];
    args.extend(
        ["-vn", "-acodec", "pcm_s16le", "-ar", "16000", "-ac", "1"]
            .iter()
            .map(OsString::from),
    );
    args.push(output.into());
    args
}

/// FFmpeg arguments for a mux.
///
/// Subtitles become a `mov_text` stream tagged with the target language, or
/// are burned into the picture (re-encoding the video). A dub replaces the
/// original audio; a background track is mixed under it.
pub fn mux_args(request: &MuxRequest<'_>) -> Vec<OsString> {
    let lang = iso639_2(request.language);
    let title = language_name(request.language);

    let mut args: Vec<OsString> = vec!["-y".into(), "-i".into(), request.video.into()];
    let mut next_input = 1;
    let mut add_input = |args: &mut Vec<OsString>, path: &Path| {
        args.push("-i".into());
        args.push(path.into());
        next_input += 1;
        next_input - 1
    };

    let dub = request.dub.map(|dub| add_input(&mut args, dub));
    let background = match (dub, request.background) {
        (Some(_), Some(background)) => Some(add_input(&mut args, background)),
        _ => None,
    };
    let soft_subs = (!request.burn_subtitles).then(|| add_input(&mut args, request.subtitles));

    if let (Some(dub), Some(background)) = (dub, background) {
        args.push("-filter_complex".into());
        args.push(
            format!(
                "[{dub}:a]volume=1.5[voice];[{background}:a]volume=0.8[bg];\
                 [voice][bg]amix=inputs=2:duration=first[mix]"
            )
            .into(),
        );
    }
    if request.burn_subtitles {
        args.push("-vf".into());
        args.push(subtitles_filter(request.subtitles).into());
    }

    push_all(&mut args, &["-map", "0:v:0"]);
    match (dub, background) {
        (Some(_), Some(_)) => push_all(&mut args, &["-map", "[mix]"]),
        (Some(dub), None) => push_all(&mut args, &["-map", &format!("{dub}:a:0")]),
        _ => push_all(&mut args, &["-map", "0:a?"]),
    }
    if let Some(subs) = soft_subs {
        push_all(&mut args, &["-map", &format!("{subs}:0")]);
    }

    if request.burn_subtitles {
        push_all(&mut args, &["-c:v", "libx264", "-preset", "veryfast", "-crf", "22"]);
    } else {
        push_all(&mut args, &["-c:v", "copy"]);
    }
    if dub.is_some() {
        push_all(&mut args, &["-c:a", "aac", "-b:a", "192k"]);
        push_all(&mut args, &["-metadata:s:a:0", &format!("language={lang}")]);
    } else {
        push_all(&mut args, &["-c:a", "copy"]);
    }
    if soft_subs.is_some() {
        push_all(&mut args, &["-c:s", "mov_text"]);
        push_all(&mut args, &["-metadata:s:s:0", &format!("language={lang}")]);
        push_all(&mut args, &["-metadata:s:s:0", &format!("title={title}")]);
    }

    args.push(request.output.into());
    args
}

fn push_all(args: &mut Vec<OsString>, items: &[&str]) {
    args.extend(items.iter().map(OsString::from));
}

/// `subtitles=` video filter for `path`, quoted for the filtergraph parser.
fn subtitles_filter(path: &Path) -> String {
    let escaped = path
        .to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "'\\''");
    format!("subtitles='{escaped}'")
}

/// Splits speech from music and ambience.
#[async_trait]
pub trait BackgroundSeparator: Send + Sync {
    /// Write everything but the vocals of `audio` to `output` as WAV.
    async fn separate(&self, audio: &Path, output: &Path) -> Result<()>;

    fn name(&self) -> &'static str;
}

/// Two-stem separation with Demucs.
pub struct Demucs {
    binary: PathBuf,
}

impl Demucs {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.demucs_binary)
    }
}

pub fn demucs_args(audio: &Path, out_dir: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["--two-stems", "vocals", "-d", "cpu", "-o"]
        .iter()
        .map(OsString::from)
        .collect();
    args.push(out_dir.into());
    args.push(audio.into());
    args
}

/// First `no_vocals.wav` below `dir`.
fn find_no_vocals(dir: &Path) -> Option<PathBuf> {
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if let Some(found) = find_no_vocals(&path) {
                return Some(found);
            }
        } else if path.file_name().is_some_and(|n| n == "no_vocals.wav") {
            return Some(path);
        }
    }
    None
}

#[async_trait]
impl BackgroundSeparator for Demucs {
    async fn separate(&self, audio: &Path, output: &Path) -> Result<()> {
        let scratch = tempfile::tempdir()?;
        info!("Separating background audio with {}", self.binary.display());

        let result = Command::new(&self.binary)
            .args(demucs_args(audio, scratch.path()))
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                DubsubError::Media(format!(
                    "Failed to run {}: {e}",
                    self.binary.display()
                ))
            })?;
        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(DubsubError::Media(format!(
                "Demucs failed: {}",
                tail.into_iter().rev().collect::<Vec<_>>().join("\n")
            )));
        }

        let stem = find_no_vocals(scratch.path()).ok_or_else(|| {
            DubsubError::Media("Demucs produced no no_vocals.wav".to_string())
        })?;
        write_atomic(output, &tokio::fs::read(&stem).await?)?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "demucs"
    }
}

#[async_trait]
impl MediaTool for Ffmpeg {
    async fn extract_audio(&self, video: &Path, output: &Path) -> Result<()> {
        if !video.exists() {
            return Err(DubsubError::FileNotFound(video.display().to_string()));
        }
        info!("Extracting audio from {}", video.display());
        self.run_ffmpeg(extract_args(video, output)).await
    }

    async fn probe_duration(&self, media: &Path) -> Result<Duration> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(media)
            .output()
            .await
            .map_err(|e| DubsubError::Media(format!("Failed to run FFprobe: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DubsubError::Media(format!("FFprobe failed: {stderr}")));
        }

        parse_duration(&String::from_utf8_lossy(&output.stdout))
    }

    async fn mux(&self, request: &MuxRequest<'_>) -> Result<()> {
        info!(
            "Muxing {} ({})",
            request.output.display(),
            match (request.dub.is_some(), request.burn_subtitles) {
                (true, true) => "dub + burned subtitles",
                (true, false) => "dub + subtitles",
                (false, true) => "burned subtitles",
                (false, false) => "subtitles",
            }
        );
        self.run_ffmpeg(mux_args(request)).await
    }
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let secs: f64 = raw.trim().parse().map_err(|e| {
        DubsubError::Media(format!("Failed to parse duration '{}': {e}", raw.trim()))
    })?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(DubsubError::Media(format!("Invalid duration '{}'", raw.trim())));
    }
    Ok(Duration::from_secs_f64(secs))
}
