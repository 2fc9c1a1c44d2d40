//! Pipeline controller: sequences the stages, persists state between them,
//! and resumes interrupted runs at the first incomplete stage.
//!
//! The controller performs no synthesis or rendering itself; it owns the
//! state record and decides what runs next. Every stage transition is
//! persisted before the next stage starts, so a crash loses at most the
//! in-flight stage's work.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::caption::{self, srt};
use crate::config::{BackgroundSpec, PipelineConfig};
use crate::error::{PipelineError, Result};
use crate::progress::{LogObserver, PipelineEvent, PipelineObserver};
use crate::render::{self, RenderJob};
use crate::script::Script;
use crate::script_gen::ScriptGenerator;
use crate::state::{PipelineState, RunStage};
use crate::synthesis;
use crate::timeline;
use crate::tts::TtsProvider;

/// One configured pipeline, able to run and resume podcast generations.
pub struct Pipeline {
    config: PipelineConfig,
    generator: Arc<dyn ScriptGenerator>,
    tts: Arc<dyn TtsProvider>,
    background: BackgroundSpec,
    observer: Arc<dyn PipelineObserver>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        generator: Arc<dyn ScriptGenerator>,
        tts: Arc<dyn TtsProvider>,
        background: BackgroundSpec,
    ) -> Self {
        Self {
            config,
            generator,
            tts,
            background,
            observer: Arc::new(LogObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Token the UI can trigger to cancel in-flight work. State is persisted
    /// before the run exits, so a cancelled run stays resumable.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a fresh run for a topic. Returns the rendered video path.
    pub async fn run(&self, topic: &str) -> Result<PathBuf> {
        let run_id = uuid::Uuid::new_v4().simple().to_string();
        info!("Starting run {} for topic {:?}", run_id, topic);
        let mut state = PipelineState::new(run_id, topic);
        self.drive(&mut state).await
    }

    /// Resume an existing run at its first incomplete stage. Already
    /// synthesized turns are never re-synthesized.
    pub async fn resume(&self, run_id: &str) -> Result<PathBuf> {
        let mut state = PipelineState::load(&self.state_dir(), run_id)?;
        if state.stage == RunStage::Completed {
            if let Some(output) = &state.output_path {
                info!("Run {} already completed: {}", run_id, output.display());
                return Ok(output.clone());
            }
        }
        if state.stage == RunStage::Failed {
            state.stage = first_incomplete_stage(&state);
            state.error = None;
            info!("Resuming failed run {} from stage {:?}", run_id, state.stage);
        } else {
            info!("Resuming run {} at stage {:?}", run_id, state.stage);
        }
        self.drive(&mut state).await
    }

    /// Advance the state machine until completion or failure, persisting
    /// between stages.
    async fn drive(&self, state: &mut PipelineState) -> Result<PathBuf> {
        loop {
            if self.cancel.is_cancelled() && !state.stage.is_terminal() {
                warn!("Run {} cancelled at stage {:?}", state.run_id, state.stage);
                state.save(&self.state_dir())?;
                return Err(PipelineError::Cancelled);
            }

            let stage = state.stage;
            match self.advance(state).await {
                Ok(Some(output)) => {
                    self.emit(PipelineEvent::RunCompleted {
                        run_id: state.run_id.clone(),
                        output_path: output.display().to_string(),
                    });
                    return Ok(output);
                }
                Ok(None) => {
                    self.emit(PipelineEvent::StageCompleted {
                        run_id: state.run_id.clone(),
                        stage,
                    });
                }
                Err(PipelineError::Cancelled) => {
                    // Keep the stage as-is: progress inside it (synthesized
                    // turns) was written back and must survive for resume.
                    state.save(&self.state_dir())?;
                    return Err(PipelineError::Cancelled);
                }
                Err(e) => {
                    error!("Run {} failed at stage {:?}: {}", state.run_id, stage, e);
                    state.error = Some(format!("{:?}: {}", stage, e));
                    state.stage = RunStage::Failed;
                    state.save(&self.state_dir())?;
                    self.emit(PipelineEvent::RunFailed {
                        run_id: state.run_id.clone(),
                        message: e.to_string(),
                    });
                    return Err(e);
                }
            }
        }
    }

    /// Run the work for the current stage. Returns the output path once the
    /// run reaches `Completed`.
    async fn advance(&self, state: &mut PipelineState) -> Result<Option<PathBuf>> {
        self.emit(PipelineEvent::StageStarted {
            run_id: state.run_id.clone(),
            stage: state.stage,
        });

        match state.stage {
            RunStage::Created => {
                let script = self
                    .generator
                    .generate_script(&state.topic)
                    .await
                    .map_err(|e| PipelineError::Generation(e.to_string()))?;
                script.validate()?;
                info!("Script ready: {} turns", script.len());
                state.script = Some(script);
                state.stage = RunStage::ScriptReady;
                state.save(&self.state_dir())?;
            }

            RunStage::ScriptReady => {
                state.stage = RunStage::Synthesizing;
                state.save(&self.state_dir())?;
            }

            RunStage::Synthesizing => {
                let mut script = state
                    .script
                    .clone()
                    .ok_or_else(|| PipelineError::Persistence("state has no script".into()))?;

                let audio_dir = self.run_dir(&state.run_id).join("audio");
                let result = synthesis::synthesize_script(
                    &mut script,
                    self.tts.clone(),
                    &self.config.synthesis,
                    &audio_dir,
                    self.observer.clone(),
                    &self.cancel,
                )
                .await;

                // Whatever completed belongs in the record, even on failure.
                state.script = Some(script.clone());
                state.save(&self.state_dir())?;
                let report = result?;

                if !report.is_complete() {
                    let failed = report.failed_indices();
                    if !self.config.proceed_on_partial_failure {
                        let (turn_index, message) = report.failed[0].clone();
                        return Err(PipelineError::Synthesis {
                            turn_index,
                            message: format!(
                                "{} turns failed synthesis ({:?}); first error: {}",
                                failed.len(),
                                failed,
                                message
                            ),
                        });
                    }
                    warn!(
                        "Proceeding with trimmed script; dropped failed turns {:?}",
                        failed
                    );
                }

                let assembly = self.assembly_script(state)?;
                let entries = timeline::assemble_timeline(&assembly, self.config.gap_ms)?;

                let track = self.run_dir(&state.run_id).join("narration.mp3");
                tokio::fs::create_dir_all(self.run_dir(&state.run_id)).await?;
                timeline::concat_track(&assembly, &entries, self.config.gap_ms, &track).await?;

                let (entries, track) = if self.config.speed_adjustment_enabled() {
                    let adjusted = self.run_dir(&state.run_id).join("narration_adjusted.mp3");
                    crate::media::adjust_tempo(&track, &adjusted, self.config.speed_ratio).await?;
                    (
                        timeline::rescale_timeline(&entries, self.config.speed_ratio),
                        adjusted,
                    )
                } else {
                    (entries, track)
                };

                state.timeline = Some(entries);
                state.audio_track = Some(track);
                state.stage = RunStage::TimelineAssembled;
                state.save(&self.state_dir())?;
            }

            RunStage::TimelineAssembled => {
                let assembly = self.assembly_script(state)?;
                // Cues are built against the unadjusted timeline (word
                // timings are clip-relative) and rescaled with the same map
                // the timeline went through.
                let base_entries = timeline::assemble_timeline(&assembly, self.config.gap_ms)?;
                let cues = caption::build_captions(&assembly, &base_entries, &self.config.captions)?;
                let cues = if self.config.speed_adjustment_enabled() {
                    caption::rescale_cues(&cues, self.config.speed_ratio)
                } else {
                    cues
                };

                let track_path = self.run_dir(&state.run_id).join("captions.srt");
                srt::write_srt(&cues, &self.config.captions, &track_path)?;

                state.captions = Some(cues);
                state.caption_track = Some(track_path);
                state.stage = RunStage::CaptionsBuilt;
                state.save(&self.state_dir())?;
            }

            RunStage::CaptionsBuilt => {
                state.stage = RunStage::Rendering;
                state.save(&self.state_dir())?;
            }

            RunStage::Rendering => {
                let entries = state
                    .timeline
                    .clone()
                    .ok_or_else(|| PipelineError::Persistence("state has no timeline".into()))?;
                let cues = state.captions.clone().unwrap_or_default();
                let audio_track = state
                    .audio_track
                    .clone()
                    .ok_or_else(|| PipelineError::Persistence("state has no audio track".into()))?;
                let caption_track = state
                    .caption_track
                    .clone()
                    .ok_or_else(|| PipelineError::Persistence("state has no caption track".into()))?;

                let output = self
                    .config
                    .output_dir
                    .join(format!("podcast_{}.mp4", state.run_id));
                let job = RenderJob {
                    audio_track: &audio_track,
                    caption_track: &caption_track,
                    background: &self.background,
                    entries: &entries,
                    cues: &cues,
                };
                let output = render::render(
                    &job,
                    &self.config.render,
                    &self.config.captions,
                    &output,
                    &self.cancel,
                )
                .await?;

                state.output_path = Some(output);
                state.stage = RunStage::Completed;
                state.save(&self.state_dir())?;
            }

            RunStage::Completed => {
                let output = state
                    .output_path
                    .clone()
                    .ok_or_else(|| PipelineError::Persistence("completed run has no output".into()))?;
                return Ok(Some(output));
            }

            RunStage::Failed => {
                return Err(PipelineError::Persistence(
                    "cannot advance a failed run; resume it instead".into(),
                ));
            }
        }

        Ok(None)
    }

    /// The script the assembler and caption builder operate on: the full
    /// script when synthesis completed, or the trimmed re-indexed view when
    /// proceeding past a partial failure.
    fn assembly_script(&self, state: &PipelineState) -> Result<Script> {
        let script = state
            .script
            .as_ref()
            .ok_or_else(|| PipelineError::Persistence("state has no script".into()))?;
        if script.turns.iter().all(|t| t.is_synthesized()) {
            Ok(script.clone())
        } else if self.config.proceed_on_partial_failure {
            Ok(script.trimmed_to_synthesized())
        } else {
            Err(PipelineError::AssemblyPrecondition(
                "script has unsynthesized turns".into(),
            ))
        }
    }

    fn state_dir(&self) -> PathBuf {
        self.config.work_dir.join("state")
    }

    fn run_dir(&self, run_id: &str) -> PathBuf {
        self.config.work_dir.join(run_id)
    }

    fn emit(&self, event: PipelineEvent) {
        self.observer.on_event(event);
    }
}

/// Where a run should pick up, judged by which artifacts the record already
/// holds.
fn first_incomplete_stage(state: &PipelineState) -> RunStage {
    if state.script.is_none() {
        RunStage::Created
    } else if state.timeline.is_none() || state.audio_track.is_none() {
        RunStage::Synthesizing
    } else if state.caption_track.is_none() {
        RunStage::TimelineAssembled
    } else if state.output_path.is_none() {
        RunStage::Rendering
    } else {
        RunStage::Completed
    }
}
