//! Pipeline progress events.
//!
//! The controller reports stage transitions and per-turn synthesis progress
//! to an observer; the terminal front-end (or any other UI) implements the
//! trait on its side of the boundary.

use serde::{Deserialize, Serialize};

use crate::state::RunStage;

/// An event emitted by the pipeline controller or the synthesis workers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    StageStarted {
        run_id: String,
        stage: RunStage,
    },
    StageCompleted {
        run_id: String,
        stage: RunStage,
    },
    TurnSynthesized {
        turn_index: usize,
        duration_ms: u64,
    },
    TurnFailed {
        turn_index: usize,
        message: String,
    },
    RunCompleted {
        run_id: String,
        output_path: String,
    },
    RunFailed {
        run_id: String,
        message: String,
    },
}

/// Observer for pipeline events. Implementations must be cheap and
/// non-blocking; synthesis workers call this from inside the pool.
pub trait PipelineObserver: Send + Sync {
    fn on_event(&self, event: PipelineEvent);
}

/// Observer that logs events and otherwise discards them.
#[derive(Debug, Default)]
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn on_event(&self, event: PipelineEvent) {
        log::info!("pipeline event: {:?}", event);
    }
}
