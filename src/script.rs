//! Script and turn data model.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Synthesis status of a single turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    Pending,
    Synthesizing,
    Synthesized,
    Failed,
}

/// One word's timing inside a turn's own audio, as reported by the
/// TTS provider. Offsets are relative to the clip, not the timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WordTiming {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

/// A synthesized audio clip and its measured duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioArtifact {
    pub path: PathBuf,
    pub duration_ms: u64,
    /// Exact word timings when the provider supplies them.
    pub word_timings: Option<Vec<WordTiming>>,
}

/// One speaker's utterance, the atomic unit of synthesis.
///
/// `audio` is present iff `status == Synthesized`; downstream stages must go
/// through [`Turn::measured`] rather than reaching into the option.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    /// Ordinal position in the script, defines speaking order.
    pub index: usize,
    pub speaker_id: String,
    pub text: String,
    pub status: TurnStatus,
    pub audio: Option<AudioArtifact>,
}

impl Turn {
    pub fn new(index: usize, speaker_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            index,
            speaker_id: speaker_id.into(),
            text: text.into(),
            status: TurnStatus::Pending,
            audio: None,
        }
    }

    /// Transition to `Synthesized` with the measured artifact.
    pub fn mark_synthesized(&mut self, artifact: AudioArtifact) {
        self.audio = Some(artifact);
        self.status = TurnStatus::Synthesized;
    }

    pub fn mark_failed(&mut self) {
        self.audio = None;
        self.status = TurnStatus::Failed;
    }

    pub fn is_synthesized(&self) -> bool {
        self.status == TurnStatus::Synthesized
    }

    /// The measured artifact, or an `AssemblyPrecondition` error if this turn
    /// never completed synthesis.
    pub fn measured(&self) -> Result<&AudioArtifact> {
        match (&self.audio, self.status) {
            (Some(artifact), TurnStatus::Synthesized) => Ok(artifact),
            _ => Err(PipelineError::AssemblyPrecondition(format!(
                "turn {} has no measured duration (status {:?})",
                self.index, self.status
            ))),
        }
    }
}

/// An ordered sequence of turns. Immutable after generation except for
/// per-turn status/audio mutation by the synthesis stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Script {
    pub turns: Vec<Turn>,
}

impl Script {
    pub fn new(turns: Vec<Turn>) -> Result<Self> {
        let script = Self { turns };
        script.validate()?;
        Ok(script)
    }

    /// Indices must form a contiguous 0-based run with no gaps.
    pub fn validate(&self) -> Result<()> {
        for (expected, turn) in self.turns.iter().enumerate() {
            if turn.index != expected {
                return Err(PipelineError::InvalidScript(format!(
                    "turn at position {} has index {}, expected {}",
                    expected, turn.index, expected
                )));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// Indices of turns still needing synthesis.
    pub fn unsynthesized_indices(&self) -> Vec<usize> {
        self.turns
            .iter()
            .filter(|t| !t.is_synthesized())
            .map(|t| t.index)
            .collect()
    }

    /// A view keeping only synthesized turns, re-indexed contiguously for
    /// assembly. Original indices are lost, so callers must report against
    /// the full script before trimming.
    pub fn trimmed_to_synthesized(&self) -> Script {
        let turns = self
            .turns
            .iter()
            .filter(|t| t.is_synthesized())
            .cloned()
            .enumerate()
            .map(|(i, mut t)| {
                t.index = i;
                t
            })
            .collect();
        Script { turns }
    }
}
