//! On-disk stage artifacts and the manifest that decides their reuse.
//!
//! Every artifact lives in the work directory as `<stem>.<name>` and is
//! described in `<stem>.manifest.json` by the signature it was produced
//! with. A stage is skipped only when its recorded signature equals the one
//! the current run would use and the artifact still validates.

use super::Stage;
use crate::dub::wav;
use crate::error::Result;
use crate::storage::{is_non_empty_file, write_atomic};
use crate::subtitle::srt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, warn};

/// Size and modification time of a file, used to notice changed inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIdentity {
    pub path: PathBuf,
    pub size: u64,
    pub modified_ms: u64,
}

impl FileIdentity {
    pub fn of(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        let modified_ms = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Ok(Self {
            path: path.canonicalize().unwrap_or_else(|_| path.to_path_buf()),
            size: meta.len(),
            modified_ms,
        })
    }
}

/// Every input that affects a stage's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSignature {
    pub stage: Stage,
    pub input: FileIdentity,
    /// Artifacts of earlier stages, as consumed.
    #[serde(default)]
    pub upstream: Vec<FileIdentity>,
    pub source_lang: Option<String>,
    pub target_lang: Option<String>,
    pub provider: Option<String>,
    pub model: Option<String>,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

impl StageSignature {
    pub fn new(stage: Stage, input: FileIdentity) -> Self {
        Self {
            stage,
            input,
            upstream: Vec::new(),
            source_lang: None,
            target_lang: None,
            provider: None,
            model: None,
            settings: BTreeMap::new(),
        }
    }

    pub fn upstream(mut self, artifact: FileIdentity) -> Self {
        self.upstream.push(artifact);
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source_lang = Some(source.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target_lang = Some(target.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn setting(mut self, key: &str, value: impl ToString) -> Self {
        self.settings.insert(key.to_string(), value.to_string());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ManifestEntry {
    signature: StageSignature,
    artifact: PathBuf,
    /// Language of a subtitle artifact, needed when it was auto-detected.
    #[serde(default)]
    language: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    stages: BTreeMap<Stage, ManifestEntry>,
}

/// A reusable artifact found in the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reusable {
    pub path: PathBuf,
    pub language: Option<String>,
}

/// The work directory of one input file.
pub struct ArtifactStore {
    dir: PathBuf,
    stem: String,
    manifest: Manifest,
}

impl ArtifactStore {
    /// Open (creating if needed) the store for `input` under `dir`.
    pub fn open(dir: impl Into<PathBuf>, input: &Path) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input".to_string());

        let manifest_path = dir.join(format!("{stem}.manifest.json"));
        let manifest = match std::fs::read(&manifest_path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(
                    "Ignoring unreadable manifest {}: {}",
                    manifest_path.display(),
                    e
                );
                Manifest::default()
            }),
            Err(_) => Manifest::default(),
        };

        Ok(Self {
            dir,
            stem,
            manifest,
        })
    }

    /// Default work directory: `<input dir>/<stem>_dubsub`.
    pub fn default_dir(input: &Path) -> PathBuf {
        let stem = input.file_stem().unwrap_or_default().to_string_lossy();
        input
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(format!("{stem}_dubsub"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", self.stem, name))
    }

    pub fn audio_path(&self) -> PathBuf {
        self.path("audio.wav")
    }

    pub fn source_subtitles_path(&self) -> PathBuf {
        self.path("source.srt")
    }

    pub fn target_subtitles_path(&self, target: &str) -> PathBuf {
        self.path(&format!("{target}.srt"))
    }

    pub fn dub_path(&self, target: &str) -> PathBuf {
        self.path(&format!("{target}.dub.wav"))
    }

    /// Original audio minus vocals, mixed under the dub.
    pub fn background_path(&self) -> PathBuf {
        self.path("background.wav")
    }

    fn manifest_path(&self) -> PathBuf {
        self.path("manifest.json")
    }

    /// The recorded artifact for `stage`, if it was produced with
    /// `signature` and still validates.
    pub fn reusable(&self, stage: Stage, signature: &StageSignature) -> Option<Reusable> {
        let entry = self.manifest.stages.get(&stage)?;
        if &entry.signature != signature {
            debug!("{}: signature changed, artifact not reused", stage);
            return None;
        }
        if !is_valid_artifact(stage, &entry.artifact) {
            debug!("{}: artifact {} failed validation", stage, entry.artifact.display());
            return None;
        }
        Some(Reusable {
            path: entry.artifact.clone(),
            language: entry.language.clone(),
        })
    }

    /// Record a stage's artifact and persist the manifest.
    pub fn record(
        &mut self,
        stage: Stage,
        signature: StageSignature,
        artifact: &Path,
        language: Option<&str>,
    ) -> Result<()> {
        self.manifest.stages.insert(
            stage,
            ManifestEntry {
                signature,
                artifact: artifact.to_path_buf(),
                language: language.map(str::to_string),
            },
        );
        self.save()
    }

    /// Forget a stage so a partial artifact is never reused.
    pub fn forget(&mut self, stage: Stage) -> Result<()> {
        if self.manifest.stages.remove(&stage).is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(&self.manifest)?;
        write_atomic(&self.manifest_path(), &bytes)?;
        Ok(())
    }
}

/// Non-empty, and parseable as what the stage produces.
pub fn is_valid_artifact(stage: Stage, path: &Path) -> bool {
    if !is_non_empty_file(path) {
        return false;
    }
    match stage {
        Stage::Extract | Stage::Dub => wav::is_valid(path),
        Stage::Transcribe | Stage::Translate => srt::read(path, "und")
            .map(|doc| !doc.is_empty())
            .unwrap_or(false),
        Stage::Mux => true,
    }
}
