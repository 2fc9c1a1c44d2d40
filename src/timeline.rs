//! Timeline assembly: placing every turn's clip on a single time axis and
//! concatenating the clips into one track.
//!
//! Offsets are integer milliseconds throughout; the cursor walk is pure
//! integer addition, so a thousand short clips accumulate zero drift.

use std::io::Write;
use std::path::Path;

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::media;
use crate::script::Script;

/// One turn's placement on the final time axis. Derived, never mutated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimelineEntry {
    pub turn_index: usize,
    pub start_ms: u64,
    pub end_ms: u64,
}

impl TimelineEntry {
    pub fn duration_ms(&self) -> u64 {
        self.end_ms - self.start_ms
    }
}

/// Walk turns in index order, emitting one entry per turn with a fixed
/// optional gap between consecutive entries.
///
/// Fatal if any turn lacks a measured duration: that is a prior-stage
/// invariant break, not a recoverable condition. Zero-duration turns produce
/// zero-width entries and are never dropped, since the caption builder still
/// expects a cue slot per turn.
pub fn assemble_timeline(script: &Script, gap_ms: u64) -> Result<Vec<TimelineEntry>> {
    let mut entries = Vec::with_capacity(script.len());
    let mut cursor: u64 = 0;

    for turn in &script.turns {
        let duration = turn.measured()?.duration_ms;
        if turn.index > 0 {
            cursor += gap_ms;
        }
        entries.push(TimelineEntry {
            turn_index: turn.index,
            start_ms: cursor,
            end_ms: cursor + duration,
        });
        cursor += duration;
    }

    info!(
        "Assembled timeline: {} entries, {} ms total",
        entries.len(),
        cursor
    );
    Ok(entries)
}

/// Total track length implied by a timeline.
pub fn total_duration_ms(entries: &[TimelineEntry]) -> u64 {
    entries.last().map(|e| e.end_ms).unwrap_or(0)
}

/// Map a timeline onto a new time base after tempo adjustment. Shared
/// boundaries map through the same rounding, so contiguity is preserved.
pub fn rescale_timeline(entries: &[TimelineEntry], speed_ratio: f64) -> Vec<TimelineEntry> {
    entries
        .iter()
        .map(|e| TimelineEntry {
            turn_index: e.turn_index,
            start_ms: rescale_ms(e.start_ms, speed_ratio),
            end_ms: rescale_ms(e.end_ms, speed_ratio),
        })
        .collect()
}

/// A timestamp at `speed_ratio` playback lands at `t / speed_ratio`.
pub fn rescale_ms(ms: u64, speed_ratio: f64) -> u64 {
    (ms as f64 / speed_ratio).round() as u64
}

/// Concatenate turn clips in index order into a single track, inserting a
/// generated silence clip between turns when a gap is configured.
///
/// Returns the measured duration of the written track in milliseconds.
pub async fn concat_track(
    script: &Script,
    entries: &[TimelineEntry],
    gap_ms: u64,
    output: &Path,
) -> Result<u64> {
    if entries.len() != script.len() {
        return Err(PipelineError::AssemblyPrecondition(format!(
            "timeline has {} entries for {} turns",
            entries.len(),
            script.len()
        )));
    }

    let temp_dir = tempfile::tempdir()?;

    let silence_path = temp_dir.path().join("gap.mp3");
    if gap_ms > 0 {
        media::generate_silence(gap_ms, &silence_path).await?;
    }

    // Concat demuxer list, one clip per line.
    let list_path = temp_dir.path().join("concat_list.txt");
    let mut list = std::fs::File::create(&list_path)?;
    for turn in &script.turns {
        let artifact = turn.measured()?;
        if turn.index > 0 && gap_ms > 0 {
            writeln!(list, "file '{}'", silence_path.display())?;
        }
        // Zero-duration clips are listed too; the demuxer passes them through.
        writeln!(list, "file '{}'", artifact.path.display())?;
    }
    drop(list);

    media::run_ffmpeg(&[
        "-f",
        "concat",
        "-safe",
        "0",
        "-i",
        &list_path.to_string_lossy(),
        "-c",
        "copy",
        "-y",
        &output.to_string_lossy(),
    ])
    .await?;

    let measured = media::probe_duration_ms(output).await?;
    info!(
        "Concatenated {} clips into {} ({} ms measured, {} ms expected)",
        script.len(),
        output.display(),
        measured,
        total_duration_ms(entries)
    );
    Ok(measured)
}
