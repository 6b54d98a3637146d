//! Stage sequencing, artifact reuse and run reporting.

pub mod artifacts;
pub mod orchestrator;
pub mod summary;

pub use artifacts::{ArtifactStore, FileIdentity, StageSignature};
pub use orchestrator::{Capabilities, PipelineOrchestrator, RunOptions, RunReport};
pub use summary::print_summary;

use crate::error::{DubsubError, Result};
use crate::storage::is_non_empty_file;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Extract,
    Transcribe,
    Translate,
    Dub,
    Mux,
}

impl Stage {
    /// Every stage in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Extract,
        Stage::Transcribe,
        Stage::Translate,
        Stage::Dub,
        Stage::Mux,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Extract => "extract",
            Stage::Transcribe => "transcribe",
            Stage::Translate => "translate",
            Stage::Dub => "dub",
            Stage::Mux => "mux",
        }
    }

    /// Process exit status when this stage aborts the run.
    pub fn exit_code(&self) -> i32 {
        match self {
            Stage::Extract => 10,
            Stage::Transcribe => 11,
            Stage::Translate => 12,
            Stage::Dub => 13,
            Stage::Mux => 14,
        }
    }

    fn upstream(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().take_while(move |s| s != self)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Pending,
    /// Ran in this process.
    Done,
    /// A matching artifact from an earlier run was used.
    Reused,
    Failed,
    /// Not part of this run (no dub requested, subtitles only).
    Skipped,
}

impl StageStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, StageStatus::Done | StageStatus::Reused)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Pending => "pending",
            StageStatus::Done => "done",
            StageStatus::Reused => "reused",
            StageStatus::Failed => "failed",
            StageStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Per-stage state of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    input_path: PathBuf,
    statuses: BTreeMap<Stage, StageStatus>,
    artifacts: BTreeMap<Stage, PathBuf>,
}

impl PipelineRun {
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Self {
            input_path: input_path.into(),
            statuses: Stage::ALL
                .into_iter()
                .map(|s| (s, StageStatus::Pending))
                .collect(),
            artifacts: BTreeMap::new(),
        }
    }

    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        self.statuses
            .get(&stage)
            .copied()
            .unwrap_or(StageStatus::Pending)
    }

    pub fn artifact(&self, stage: Stage) -> Option<&Path> {
        self.artifacts.get(&stage).map(PathBuf::as_path)
    }

    /// Record a finished stage.
    ///
    /// Refused unless every upstream stage that is part of the run is done
    /// and `artifact` is a non-empty file.
    pub fn mark_done(&mut self, stage: Stage, artifact: &Path, reused: bool) -> Result<()> {
        if let Some(blocking) = stage
            .upstream()
            .find(|s| !matches!(self.status(*s), StageStatus::Skipped) && !self.status(*s).is_done())
        {
            return Err(DubsubError::fatal(
                stage,
                format!("upstream stage {} is not done", blocking),
            ));
        }
        if !is_non_empty_file(artifact) {
            return Err(DubsubError::fatal(
                stage,
                format!("artifact {} is missing or empty", artifact.display()),
            ));
        }

        let status = if reused {
            StageStatus::Reused
        } else {
            StageStatus::Done
        };
        self.statuses.insert(stage, status);
        self.artifacts.insert(stage, artifact.to_path_buf());
        Ok(())
    }

    pub fn mark_failed(&mut self, stage: Stage) {
        self.statuses.insert(stage, StageStatus::Failed);
    }

    pub fn mark_skipped(&mut self, stage: Stage) {
        self.statuses.insert(stage, StageStatus::Skipped);
    }

    /// First failed stage, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        Stage::ALL
            .into_iter()
            .find(|s| self.status(*s) == StageStatus::Failed)
    }

    pub fn statuses(&self) -> impl Iterator<Item = (Stage, StageStatus)> + '_ {
        self.statuses.iter().map(|(s, st)| (*s, *st))
    }
}
