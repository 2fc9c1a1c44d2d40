//! FFmpeg/ffprobe helpers.
//!
//! All duration accounting in the pipeline is in integer milliseconds; this
//! module is the only place the ffprobe float-seconds representation is
//! converted.

use std::path::Path;

use log::debug;
use tokio::process::Command;

use crate::error::{PipelineError, Result};

/// Run ffmpeg with the given args, capturing stderr for diagnostics.
pub async fn run_ffmpeg(args: &[&str]) -> Result<()> {
    debug!("Running ffmpeg {}", args.join(" "));
    let output = Command::new("ffmpeg").args(args).output().await?;

    if !output.status.success() {
        return Err(PipelineError::AudioProcessing(format!(
            "ffmpeg exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// Measure a media file's duration in milliseconds via ffprobe.
pub async fn probe_duration_ms(path: &Path) -> Result<u64> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        return Err(PipelineError::AudioProcessing(format!(
            "ffprobe failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    let duration_str = String::from_utf8_lossy(&output.stdout);
    let seconds = duration_str.trim().parse::<f64>().map_err(|_| {
        PipelineError::AudioProcessing(format!(
            "failed to parse ffprobe duration {:?} for {}",
            duration_str.trim(),
            path.display()
        ))
    })?;

    Ok((seconds * 1000.0).round() as u64)
}

/// Generate a silent audio clip of the given length, matched to the narration
/// encoding so the concat demuxer can stream-copy it.
pub async fn generate_silence(duration_ms: u64, output: &Path) -> Result<()> {
    let duration = format!("{:.3}", duration_ms as f64 / 1000.0);
    run_ffmpeg(&[
        "-f",
        "lavfi",
        "-i",
        "anullsrc=r=44100:cl=mono",
        "-t",
        &duration,
        "-c:a",
        "libmp3lame",
        "-q:a",
        "9",
        "-y",
        &output.to_string_lossy(),
    ])
    .await
}

/// Change playback speed without changing pitch. The atempo filter only
/// accepts 0.5..=2.0, so the ratio is clamped to that range.
pub async fn adjust_tempo(input: &Path, output: &Path, speed_ratio: f64) -> Result<()> {
    let ratio = speed_ratio.clamp(0.5, 2.0);
    let filter = format!("atempo={:.4}", ratio);
    run_ffmpeg(&[
        "-i",
        &input.to_string_lossy(),
        "-filter:a",
        &filter,
        "-vn",
        "-y",
        &output.to_string_lossy(),
    ])
    .await
}

/// Format milliseconds as an ffmpeg-friendly seconds string.
pub fn ms_to_secs_str(ms: u64) -> String {
    format!("{:.3}", ms as f64 / 1000.0)
}
