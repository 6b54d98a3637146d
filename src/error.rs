use crate::pipeline::Stage;
use thiserror::Error;

/// Failure reported by an external capability (transcriber, translator,
/// synthesizer).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("invalid voice reference: {0}")]
    VoiceRefInvalid(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl CapabilityError {
    /// Whether retrying the same request can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CapabilityError::Unavailable(_)
                | CapabilityError::RateLimited(_)
                | CapabilityError::Timeout(_)
                | CapabilityError::InvalidResponse(_)
        )
    }

    /// Whether this failure should be surfaced as a run-level warning.
    pub fn is_account_issue(&self) -> bool {
        matches!(
            self,
            CapabilityError::RateLimited(_) | CapabilityError::Unauthenticated(_)
        )
    }

    /// Map an HTTP status and body to a capability error.
    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("{} {}", status, body.chars().take(300).collect::<String>());
        match status.as_u16() {
            401 | 403 => CapabilityError::Unauthenticated(detail),
            429 => CapabilityError::RateLimited(detail),
            400 | 404 | 415 | 422 => CapabilityError::Unsupported(detail),
            408 | 504 => CapabilityError::Timeout(detail),
            _ => CapabilityError::Unavailable(detail),
        }
    }
}

impl From<reqwest::Error> for CapabilityError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            CapabilityError::Timeout(e.to_string())
        } else if e.is_decode() {
            CapabilityError::InvalidResponse(e.to_string())
        } else {
            CapabilityError::Unavailable(e.to_string())
        }
    }
}

#[derive(Error, Debug)]
pub enum DubsubError {
    #[error("{stage} stage failed: {message}")]
    FatalStage { stage: Stage, message: String },

    #[error("cue {cue_index} failed: {source}")]
    PartialUnit {
        cue_index: usize,
        #[source]
        source: CapabilityError,
    },

    #[error("translation cache I/O error: {0}")]
    CacheIo(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Subtitle parse error: {0}")]
    SubtitleParse(String),

    #[error("Media tool error: {0}")]
    Media(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error(transparent)]
    Capability(#[from] CapabilityError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DubsubError {
    pub fn fatal(stage: Stage, message: impl Into<String>) -> Self {
        DubsubError::FatalStage {
            stage,
            message: message.into(),
        }
    }

    /// The stage this error aborted, if it is a stage-level failure.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            DubsubError::FatalStage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Process exit status for a run that ended with this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            DubsubError::FatalStage { stage, .. } => stage.exit_code(),
            DubsubError::Configuration(_) | DubsubError::FileNotFound(_) => 2,
            DubsubError::Cancelled => 130,
            _ => 1,
        }
    }
}

/// A cue a stage could not process. The stage keeps going without it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CueFailure {
    pub cue_index: usize,
    pub error: CapabilityError,
}

impl From<CueFailure> for DubsubError {
    fn from(f: CueFailure) -> Self {
        DubsubError::PartialUnit {
            cue_index: f.cue_index,
            source: f.error,
        }
    }
}

pub type Result<T> = std::result::Result<T, DubsubError>;

/// Result of a single call to an external capability.
pub type CapabilityResult<T> = std::result::Result<T, CapabilityError>;
