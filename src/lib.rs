pub mod cache;
pub mod config;
pub mod dub;
pub mod error;
pub mod languages;
pub mod media;
pub mod pipeline;
pub mod storage;
pub mod subtitle;
pub mod transcribe;
pub mod translate;

pub use cache::TranslationCache;
pub use config::Config;
pub use error::{DubsubError, Result};
pub use pipeline::{print_summary, PipelineOrchestrator, RunOptions, RunReport};
