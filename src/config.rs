use crate::error::{DubsubError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where speech-to-text runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionProvider {
    #[default]
    Remote,
    Local,
}

impl std::fmt::Display for TranscriptionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranscriptionProvider::Remote => write!(f, "remote"),
            TranscriptionProvider::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for TranscriptionProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" | "api" => Ok(TranscriptionProvider::Remote),
            "local" => Ok(TranscriptionProvider::Local),
            _ => Err(format!(
                "Unknown transcription provider: {}. Use 'remote' or 'local'",
                s
            )),
        }
    }
}

/// Where voice synthesis runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisProvider {
    Remote,
    #[default]
    Local,
}

impl std::fmt::Display for SynthesisProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SynthesisProvider::Remote => write!(f, "remote"),
            SynthesisProvider::Local => write!(f, "local"),
        }
    }
}

impl std::str::FromStr for SynthesisProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "remote" | "api" => Ok(SynthesisProvider::Remote),
            "local" => Ok(SynthesisProvider::Local),
            _ => Err(format!(
                "Unknown synthesis provider: {}. Use 'remote' or 'local'",
                s
            )),
        }
    }
}

/// Local whisper model sizes.
pub const MODEL_SIZES: [&str; 5] = ["tiny", "base", "small", "medium", "large"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Key for the OpenAI-compatible API used for transcription and translation.
    pub api_key: Option<String>,
    /// Base URL of the OpenAI-compatible API.
    pub api_base: String,
    pub transcription_provider: TranscriptionProvider,
    pub transcription_model: String,
    pub translation_model: String,
    pub translation_temperature: f32,
    /// Binary of the local whisper CLI.
    pub whisper_binary: String,
    /// Local whisper model size.
    pub local_model: String,
    pub synthesis_provider: SynthesisProvider,
    /// Base URL of the speech API; falls back to `api_base`.
    pub speech_api_base: Option<String>,
    pub speech_model: String,
    pub speech_voice: String,
    /// Local synthesis worker, started once per dubbing stage as
    /// `<tts_command> --serve` and fed one JSON request per line.
    pub tts_command: String,
    /// Seconds to wait for one local synthesis reply, model load included.
    pub tts_timeout_secs: u64,
    /// Source separation command for `--keep-background`.
    pub demucs_binary: String,
    pub ffmpeg_binary: String,
    pub ffprobe_binary: String,
    /// Concurrent per-cue requests inside a stage.
    pub concurrency: usize,
    /// Maximum cues per translation request.
    pub translation_batch_size: usize,
    /// Attempts per external call before a cue is flagged.
    pub max_attempts: u32,
    pub retry_base_delay_ms: u64,
    /// Ceiling on dub clip speed-up.
    pub max_speed_ratio: f64,
    /// Translation cache file; defaults to the user cache directory.
    pub cache_path: Option<PathBuf>,
    /// Stage artifact directory; defaults to `<input dir>/<stem>_dubsub`.
    pub work_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.groq.com/openai/v1".to_string(),
            transcription_provider: TranscriptionProvider::default(),
            transcription_model: "whisper-large-v3".to_string(),
            translation_model: "llama-3.3-70b-versatile".to_string(),
            translation_temperature: 0.3,
            whisper_binary: "whisper".to_string(),
            local_model: "small".to_string(),
            synthesis_provider: SynthesisProvider::default(),
            speech_api_base: None,
            speech_model: "tts-1".to_string(),
            speech_voice: "alloy".to_string(),
            tts_command: "dubsub-tts".to_string(),
            tts_timeout_secs: 300,
            demucs_binary: "demucs".to_string(),
            ffmpeg_binary: "ffmpeg".to_string(),
            ffprobe_binary: "ffprobe".to_string(),
            concurrency: 4,
            translation_batch_size: 10,
            max_attempts: 3,
            retry_base_delay_ms: 1000,
            max_speed_ratio: 1.3,
            cache_path: None,
            work_dir: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                let contents = std::fs::read_to_string(&config_path)?;
                config = toml::from_str::<Config>(&contents)?;
            }
        }

        config.apply_env();
        Ok(config)
    }

    /// Override fields from environment variables.
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            self.api_key = Some(key);
        } else if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.api_key = Some(key);
        }
        if let Ok(base) = std::env::var("DUBSUB_API_BASE") {
            self.api_base = base;
        }
        if let Ok(base) = std::env::var("DUBSUB_SPEECH_API_BASE") {
            self.speech_api_base = Some(base);
        }
        if let Ok(provider) = std::env::var("DUBSUB_TRANSCRIPTION_PROVIDER") {
            if let Ok(p) = provider.parse() {
                self.transcription_provider = p;
            }
        }
        if let Ok(provider) = std::env::var("DUBSUB_SYNTHESIS_PROVIDER") {
            if let Ok(p) = provider.parse() {
                self.synthesis_provider = p;
            }
        }
        if let Ok(concurrency) = std::env::var("DUBSUB_CONCURRENCY") {
            if let Ok(c) = concurrency.parse() {
                self.concurrency = c;
            }
        }
        if let Ok(path) = std::env::var("DUBSUB_CACHE_PATH") {
            self.cache_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("DUBSUB_WORK_DIR") {
            self.work_dir = Some(PathBuf::from(path));
        }
    }

    /// Check the settings a run needs before any stage executes.
    pub fn validate(&self, dub: bool) -> Result<()> {
        if self.api_key.is_none() {
            return Err(DubsubError::Configuration(
                "API key not set. Export GROQ_API_KEY (or OPENAI_API_KEY)".to_string(),
            ));
        }

        if self.transcription_provider == TranscriptionProvider::Local
            && !MODEL_SIZES.contains(&self.local_model.as_str())
        {
            return Err(DubsubError::Configuration(format!(
                "Unknown local model size '{}'. Use one of: {}",
                self.local_model,
                MODEL_SIZES.join(", ")
            )));
        }

        if self.concurrency == 0 {
            return Err(DubsubError::Configuration(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        if self.translation_batch_size == 0 {
            return Err(DubsubError::Configuration(
                "Translation batch size must be greater than 0".to_string(),
            ));
        }

        if dub && self.tts_timeout_secs == 0 {
            return Err(DubsubError::Configuration(
                "tts_timeout_secs must be at least 1".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(DubsubError::Configuration(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        if dub && !(1.0..=2.0).contains(&self.max_speed_ratio) {
            return Err(DubsubError::Configuration(format!(
                "max_speed_ratio must be between 1.0 and 2.0, got {}",
                self.max_speed_ratio
            )));
        }

        Ok(())
    }

    /// Model identifier that affects transcription output.
    pub fn transcription_model_id(&self) -> String {
        match self.transcription_provider {
            TranscriptionProvider::Remote => self.transcription_model.clone(),
            TranscriptionProvider::Local => self.local_model.clone(),
        }
    }

    pub fn cache_file(&self) -> PathBuf {
        self.cache_path.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("dubsub")
                .join("translations.json")
        })
    }

    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("dubsub").join("config.toml"))
    }
}
