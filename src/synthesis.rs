//! Synthesis stage: drives the TTS provider once per unsynthesized turn.
//!
//! Work is bounded by a semaphore and results are attributed by turn index,
//! never by completion order. Each provider call is the sole retry boundary
//! in the pipeline; the rest of the stages never see transient failures.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::SynthesisConfig;
use crate::error::{PipelineError, Result, TtsError};
use crate::media;
use crate::progress::{PipelineEvent, PipelineObserver};
use crate::script::{AudioArtifact, Script, TurnStatus};
use crate::tts::TtsProvider;

/// Outcome of a synthesis stage run over a script.
#[derive(Debug, Clone, Default)]
pub struct SynthesisReport {
    /// Turns synthesized during this run.
    pub synthesized: Vec<usize>,
    /// Turns already synthesized before this run; zero provider calls issued.
    pub skipped: Vec<usize>,
    /// Turns that exhausted their attempt ceiling, with the final error.
    pub failed: Vec<(usize, String)>,
}

impl SynthesisReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failed.iter().map(|(i, _)| *i).collect()
    }
}

/// Synthesize every turn of `script` that is not already `Synthesized`.
///
/// Fail-soft per turn: a turn that exhausts its retries is marked `Failed`
/// and reported, without aborting its siblings. Cancellation stops issuing
/// new work and surfaces as [`PipelineError::Cancelled`] after completed
/// turns have been written back to the script.
pub async fn synthesize_script(
    script: &mut Script,
    provider: Arc<dyn TtsProvider>,
    config: &SynthesisConfig,
    audio_dir: &Path,
    observer: Arc<dyn PipelineObserver>,
    cancel: &CancellationToken,
) -> Result<SynthesisReport> {
    tokio::fs::create_dir_all(audio_dir).await?;

    let mut report = SynthesisReport::default();
    let pending: Vec<usize> = script.unsynthesized_indices();
    for turn in &script.turns {
        if turn.is_synthesized() {
            report.skipped.push(turn.index);
        }
    }

    if pending.is_empty() {
        info!("All {} turns already synthesized, nothing to do", script.len());
        return Ok(report);
    }
    info!(
        "Synthesizing {} of {} turns ({} cached)",
        pending.len(),
        script.len(),
        report.skipped.len()
    );

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));
    let total = pending.len();
    let mut tasks = Vec::with_capacity(total);

    for index in pending {
        let turn = &mut script.turns[index];
        turn.status = TurnStatus::Synthesizing;

        let text = turn.text.clone();
        let speaker_id = turn.speaker_id.clone();
        let provider = provider.clone();
        let semaphore = semaphore.clone();
        let observer = observer.clone();
        let cancel = cancel.clone();
        let config = config.clone();
        let artifact_path = artifact_path(audio_dir, index, &text, &speaker_id);

        let task = tokio::spawn(async move {
            let permit = tokio::select! {
                permit = semaphore.acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(_) => return (index, Err(TtsError::Transient("semaphore closed".into()))),
                },
                _ = cancel.cancelled() => return (index, Err(TtsError::Transient("cancelled".into()))),
            };
            let _permit = permit;

            let result = synthesize_turn(
                provider.as_ref(),
                &text,
                &speaker_id,
                index,
                &artifact_path,
                &config,
                &cancel,
            )
            .await;

            match &result {
                Ok(artifact) => observer.on_event(PipelineEvent::TurnSynthesized {
                    turn_index: index,
                    duration_ms: artifact.duration_ms,
                }),
                Err(e) => observer.on_event(PipelineEvent::TurnFailed {
                    turn_index: index,
                    message: e.to_string(),
                }),
            }

            (index, result)
        });
        tasks.push(task);
    }

    for result in join_all(tasks).await {
        let (index, outcome) = result.map_err(|e| {
            PipelineError::AudioProcessing(format!("synthesis worker panicked: {}", e))
        })?;
        match outcome {
            Ok(artifact) => {
                script.turns[index].mark_synthesized(artifact);
                report.synthesized.push(index);
            }
            Err(e) => {
                script.turns[index].mark_failed();
                report.failed.push((index, e.to_string()));
            }
        }
    }
    report.synthesized.sort_unstable();
    report.failed.sort_unstable_by_key(|(i, _)| *i);

    if cancel.is_cancelled() {
        warn!("Synthesis cancelled after {} turns", report.synthesized.len());
        return Err(PipelineError::Cancelled);
    }

    if !report.failed.is_empty() {
        error!(
            "Synthesis finished with {} failed turns: {:?}",
            report.failed.len(),
            report.failed_indices()
        );
    } else {
        info!("Synthesis finished: {} turns synthesized", report.synthesized.len());
    }

    Ok(report)
}

/// One turn's synthesis: provider call with bounded exponential backoff,
/// artifact write, and duration measurement.
async fn synthesize_turn(
    provider: &dyn TtsProvider,
    text: &str,
    speaker_id: &str,
    index: usize,
    artifact_path: &Path,
    config: &SynthesisConfig,
    cancel: &CancellationToken,
) -> std::result::Result<AudioArtifact, TtsError> {
    let mut last_error = None;

    for attempt in 1..=config.max_attempts {
        if cancel.is_cancelled() {
            return Err(TtsError::Transient("cancelled".into()));
        }

        let outcome = tokio::select! {
            outcome = provider.synthesize(text, speaker_id) => outcome,
            _ = cancel.cancelled() => return Err(TtsError::Transient("cancelled".into())),
        };

        match outcome {
            Ok(audio) => {
                tokio::fs::write(artifact_path, &audio.audio).await?;

                // The written file is authoritative: encoders pad past the
                // reported timings, and per-clip deltas accumulate against
                // the concatenated track. The provider's figure is the
                // fallback where the file cannot be probed.
                let duration_ms = match media::probe_duration_ms(artifact_path).await {
                    Ok(ms) => ms,
                    Err(probe_err) => match audio.duration_ms {
                        Some(ms) => {
                            debug!(
                                "Falling back to reported duration for turn {}: {}",
                                index, probe_err
                            );
                            ms
                        }
                        None => return Err(TtsError::Permanent(probe_err.to_string())),
                    },
                };

                return Ok(AudioArtifact {
                    path: artifact_path.to_path_buf(),
                    duration_ms,
                    word_timings: audio.word_timings,
                });
            }
            Err(e) if e.is_retryable() && attempt < config.max_attempts => {
                let backoff = config.base_backoff_ms * 2u64.pow(attempt as u32 - 1);
                warn!(
                    "TTS attempt {}/{} for turn {} failed ({}), retrying in {}ms",
                    attempt, config.max_attempts, index, e, backoff
                );
                tokio::time::sleep(Duration::from_millis(backoff)).await;
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
    }

    Err(last_error.unwrap_or_else(|| TtsError::Permanent("attempt ceiling reached".into())))
}

/// Content-keyed artifact filename, so a retried run addressing the same text
/// and voice lands on the same file.
fn artifact_path(audio_dir: &Path, index: usize, text: &str, speaker_id: &str) -> PathBuf {
    let mut hasher = md5::Context::new();
    hasher.consume(text.as_bytes());
    hasher.consume(speaker_id.as_bytes());
    audio_dir.join(format!("turn_{:04}_{:x}.mp3", index, hasher.compute()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn artifact_paths_are_stable_and_distinct() {
        let dir = Path::new("/tmp/audio");
        let a = artifact_path(dir, 0, "hello", "host");
        let b = artifact_path(dir, 0, "hello", "host");
        let c = artifact_path(dir, 0, "hello", "guest");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
