//! Persisted per-run pipeline state, the sole basis for resume-after-failure.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::caption::CaptionCue;
use crate::error::{PipelineError, Result};
use crate::script::Script;
use crate::timeline::TimelineEntry;

/// Stage of a run's state machine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Created,
    ScriptReady,
    Synthesizing,
    TimelineAssembled,
    CaptionsBuilt,
    Rendering,
    Completed,
    Failed,
}

impl RunStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Completed | RunStage::Failed)
    }
}

/// Everything a run needs to resume after a process restart. One record per
/// run id, owned exclusively by the pipeline controller, persisted after
/// every stage transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineState {
    pub run_id: String,
    pub topic: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub stage: RunStage,
    pub script: Option<Script>,
    pub timeline: Option<Vec<TimelineEntry>>,
    pub captions: Option<Vec<CaptionCue>>,
    /// Concatenated narration track, once assembled.
    pub audio_track: Option<PathBuf>,
    /// Subtitle track file, once built.
    pub caption_track: Option<PathBuf>,
    /// Final rendered video, once completed.
    pub output_path: Option<PathBuf>,
    /// Classified error message for failed runs, with the stage it broke in.
    pub error: Option<String>,
}

impl PipelineState {
    pub fn new(run_id: impl Into<String>, topic: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            run_id: run_id.into(),
            topic: topic.into(),
            created_at: now,
            updated_at: now,
            stage: RunStage::Created,
            script: None,
            timeline: None,
            captions: None,
            audio_track: None,
            caption_track: None,
            output_path: None,
            error: None,
        }
    }

    /// Path of this run's state record under `state_dir`.
    pub fn record_path(state_dir: &Path, run_id: &str) -> PathBuf {
        state_dir.join(format!("run_{}.json", run_id))
    }

    /// Persist atomically: write a temp file in the same directory, then
    /// rename over the record. A crash mid-write leaves the previous record
    /// intact.
    pub fn save(&mut self, state_dir: &Path) -> Result<()> {
        self.updated_at = Utc::now();

        std::fs::create_dir_all(state_dir)
            .map_err(|e| PipelineError::Persistence(format!("creating state dir: {}", e)))?;

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Persistence(format!("serializing state: {}", e)))?;

        let temp = tempfile::NamedTempFile::new_in(state_dir)
            .map_err(|e| PipelineError::Persistence(format!("creating temp state file: {}", e)))?;
        std::fs::write(temp.path(), json)
            .map_err(|e| PipelineError::Persistence(format!("writing state: {}", e)))?;
        temp.persist(Self::record_path(state_dir, &self.run_id))
            .map_err(|e| PipelineError::Persistence(format!("committing state: {}", e)))?;

        debug!("Persisted state for run {} at stage {:?}", self.run_id, self.stage);
        Ok(())
    }

    pub fn load(state_dir: &Path, run_id: &str) -> Result<Self> {
        let path = Self::record_path(state_dir, run_id);
        let json = std::fs::read_to_string(&path).map_err(|e| {
            PipelineError::Persistence(format!("reading state {}: {}", path.display(), e))
        })?;
        let state: Self = serde_json::from_str(&json)
            .map_err(|e| PipelineError::Persistence(format!("parsing state: {}", e)))?;

        info!("Loaded state for run {} at stage {:?}", state.run_id, state.stage);
        Ok(state)
    }

    pub fn exists(state_dir: &Path, run_id: &str) -> bool {
        Self::record_path(state_dir, run_id).exists()
    }
}
