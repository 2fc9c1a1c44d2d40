//! Render orchestration: one ffmpeg invocation per run, composing the
//! narration track, burned-in subtitles and background visuals into the
//! final video.
//!
//! Rendering is expensive and never auto-retried; a non-zero exit or missing
//! output is fatal and carries the engine's stderr. The output is written to
//! a `.part` path and renamed into place only on success, so cancellation or
//! a crash never leaves a partial file at the final path.

use std::path::{Path, PathBuf};

use log::{error, info, warn};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::caption::{self, srt, CaptionCue};
use crate::config::{BackgroundSpec, CaptionConfig, RenderConfig};
use crate::error::{PipelineError, Result};
use crate::media::{self, ms_to_secs_str};
use crate::timeline::{total_duration_ms, TimelineEntry};

/// Everything the orchestrator needs for one invocation.
pub struct RenderJob<'a> {
    pub audio_track: &'a Path,
    pub caption_track: &'a Path,
    pub background: &'a BackgroundSpec,
    pub entries: &'a [TimelineEntry],
    pub cues: &'a [CaptionCue],
}

/// Check the render preconditions, build the ffmpeg command, run it once, and
/// atomically move the result to `output`.
pub async fn render(
    job: &RenderJob<'_>,
    render_config: &RenderConfig,
    caption_config: &CaptionConfig,
    output: &Path,
    cancel: &CancellationToken,
) -> Result<PathBuf> {
    check_preconditions(job, render_config).await?;

    let audio_ms = total_duration_ms(job.entries);
    let caption_track = burn_caption_track(job, render_config, caption_config)?;
    let args =
        build_ffmpeg_args(job, render_config, caption_config, audio_ms, &caption_track, output)?;

    // Keep the exact invocation next to the output for debugging.
    if let Some(parent) = output.parent() {
        tokio::fs::create_dir_all(parent).await?;
        let cmd_dump = parent.join("ffmpeg_cmd.txt");
        if let Err(e) = tokio::fs::write(&cmd_dump, args.join(" ")).await {
            warn!("Failed to write ffmpeg command dump: {}", e);
        }
    }

    let part_path = part_path(output);
    info!("Rendering {} ({} ms of audio)", output.display(), audio_ms);

    let child = Command::new("ffmpeg")
        .args(&args)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    let output_result = tokio::select! {
        result = child.wait_with_output() => result?,
        _ = cancel.cancelled() => {
            warn!("Render cancelled, removing partial output");
            let _ = tokio::fs::remove_file(&part_path).await;
            return Err(PipelineError::Cancelled);
        }
    };

    if !output_result.status.success() {
        let diagnostics = String::from_utf8_lossy(&output_result.stderr).to_string();
        error!("ffmpeg exited with {}", output_result.status);
        let _ = tokio::fs::remove_file(&part_path).await;
        return Err(PipelineError::Render {
            message: format!("rendering engine exited with {}", output_result.status),
            diagnostics,
        });
    }

    if !part_path.exists() {
        return Err(PipelineError::Render {
            message: "rendering engine produced no output file".to_string(),
            diagnostics: String::from_utf8_lossy(&output_result.stderr).to_string(),
        });
    }

    tokio::fs::rename(&part_path, output).await?;
    info!("Rendered {}", output.display());
    Ok(output.to_path_buf())
}

/// Audio track length must match the last timeline entry within tolerance,
/// and every cue must belong to a turn that has an entry.
async fn check_preconditions(job: &RenderJob<'_>, config: &RenderConfig) -> Result<()> {
    let measured_ms = media::probe_duration_ms(job.audio_track).await?;
    check_track_length(measured_ms, job.entries, config.duration_tolerance_ms)?;
    check_cue_coverage(job.cues, job.entries)?;

    if !job.caption_track.exists() {
        return Err(PipelineError::AssemblyPrecondition(format!(
            "caption track not found: {}",
            job.caption_track.display()
        )));
    }

    Ok(())
}

/// Measured track length against the timeline's last end offset.
pub fn check_track_length(
    measured_ms: u64,
    entries: &[TimelineEntry],
    tolerance_ms: u64,
) -> Result<()> {
    let expected_ms = total_duration_ms(entries);
    let delta = measured_ms.abs_diff(expected_ms);
    if delta > tolerance_ms {
        return Err(PipelineError::AssemblyPrecondition(format!(
            "audio track is {} ms but timeline ends at {} ms (delta {} > tolerance {})",
            measured_ms, expected_ms, delta, tolerance_ms
        )));
    }
    Ok(())
}

/// Every cue's turn must have a timeline entry.
pub fn check_cue_coverage(cues: &[CaptionCue], entries: &[TimelineEntry]) -> Result<()> {
    for cue in cues {
        if !entries.iter().any(|e| e.turn_index == cue.turn_index) {
            return Err(PipelineError::AssemblyPrecondition(format!(
                "caption cue references turn {} with no timeline entry",
                cue.turn_index
            )));
        }
    }
    Ok(())
}

/// The cover lead-in only applies when a cover image is configured.
fn effective_cover_ms(config: &RenderConfig) -> u64 {
    if config.cover_path.is_some() {
        config.cover_ms
    } else {
        0
    }
}

/// Cue timestamps as burned into the video: shifted by the cover lead-in so
/// captions stay aligned with the delayed narration, with the first cue held
/// past the video fade-in. The persisted track keeps narration-relative times.
fn burn_cues(cues: &[CaptionCue], cover_ms: u64, fade_in_ms: u64) -> Vec<CaptionCue> {
    let mut shifted = caption::shift_cues(cues, cover_ms);
    if let Some(first) = shifted.first_mut() {
        if first.start_ms < fade_in_ms {
            first.start_ms = fade_in_ms.min(first.end_ms);
        }
    }
    shifted
}

/// The subtitle file to burn: the persisted track when no adjustment is
/// needed, otherwise a sibling file holding the shifted cues.
fn burn_caption_track(
    job: &RenderJob<'_>,
    config: &RenderConfig,
    captions: &CaptionConfig,
) -> Result<PathBuf> {
    let adjusted = burn_cues(job.cues, effective_cover_ms(config), config.fade_in_ms);
    if adjusted.as_slice() == job.cues {
        return Ok(job.caption_track.to_path_buf());
    }
    let path = job.caption_track.with_extension("burn.srt");
    srt::write_srt(&adjusted, captions, &path)?;
    Ok(path)
}

/// Build the complete ffmpeg argv. Pure, so the command shape is testable
/// without invoking the engine.
pub fn build_ffmpeg_args(
    job: &RenderJob<'_>,
    config: &RenderConfig,
    captions: &CaptionConfig,
    audio_ms: u64,
    caption_track: &Path,
    output: &Path,
) -> Result<Vec<String>> {
    let (w, h) = (config.width, config.height);
    let cover_ms = effective_cover_ms(config);
    // Cover lead-in shifts everything; tail padding extends past the last turn.
    let total_ms = cover_ms + audio_ms + config.tail_ms;

    let mut inputs: Vec<String> = Vec::new();
    let mut filters: Vec<String> = Vec::new();
    let mut input_count = 0usize;
    let mut next_input = || {
        let idx = input_count;
        input_count += 1;
        idx
    };

    let scale_pad = |idx: usize, label: &str| {
        format!(
            "[{idx}:v]scale={w}:{h}:force_original_aspect_ratio=decrease,\
             pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:black,setsar=1[{label}]"
        )
    };

    let mut concat_nodes: Vec<String> = Vec::new();

    if let (Some(cover), true) = (&config.cover_path, cover_ms > 0) {
        inputs.extend([
            "-loop".into(),
            "1".into(),
            "-t".into(),
            ms_to_secs_str(cover_ms),
            "-i".into(),
            cover.to_string_lossy().into_owned(),
        ]);
        let idx = next_input();
        filters.push(scale_pad(idx, "v_cover"));
        concat_nodes.push("[v_cover]".into());
    }

    match job.background {
        BackgroundSpec::LoopedVideo(path) => {
            inputs.extend([
                "-stream_loop".into(),
                "-1".into(),
                "-i".into(),
                path.to_string_lossy().into_owned(),
            ]);
            let idx = next_input();
            filters.push(scale_pad(idx, "v_bg"));
            concat_nodes.push("[v_bg]".into());
        }
        BackgroundSpec::Image(path) => {
            inputs.extend([
                "-loop".into(),
                "1".into(),
                "-t".into(),
                ms_to_secs_str(audio_ms + config.tail_ms),
                "-i".into(),
                path.to_string_lossy().into_owned(),
            ]);
            let idx = next_input();
            filters.push(scale_pad(idx, "v_bg"));
            concat_nodes.push("[v_bg]".into());
        }
        BackgroundSpec::Slideshow(images) => {
            if images.is_empty() {
                return Err(PipelineError::Configuration(
                    "slideshow background with no images".to_string(),
                ));
            }
            let durations =
                slideshow_durations_ms(job.entries, images.len(), audio_ms + config.tail_ms);
            for (image, duration) in images.iter().zip(&durations) {
                inputs.extend([
                    "-loop".into(),
                    "1".into(),
                    "-t".into(),
                    ms_to_secs_str(*duration),
                    "-i".into(),
                    image.to_string_lossy().into_owned(),
                ]);
                let idx = next_input();
                let label = format!("v_img_{}", idx);
                filters.push(scale_pad(idx, &label));
                concat_nodes.push(format!("[{}]", label));
            }
        }
    }

    if concat_nodes.len() > 1 {
        filters.push(format!(
            "{}concat=n={}:v=1:a=0[vconcat]",
            concat_nodes.join(""),
            concat_nodes.len()
        ));
    } else {
        filters.push(format!("{}copy[vconcat]", concat_nodes[0]));
    }

    let fade_out_start = total_ms.saturating_sub(config.fade_out_ms);
    filters.push(format!(
        "[vconcat]fade=t=in:st=0:d={},fade=t=out:st={}:d={}[vfaded]",
        ms_to_secs_str(config.fade_in_ms),
        ms_to_secs_str(fade_out_start),
        ms_to_secs_str(config.fade_out_ms)
    ));

    let subtitle_path = escape_filter_path(caption_track);
    filters.push(format!(
        "[vfaded]subtitles='{}':force_style='FontName={},FontSize={},\
         PrimaryColour=&HFFFFFF&,OutlineColour=&H000000&,Outline=2,MarginV={}'[outv]",
        subtitle_path, captions.font, captions.font_size, captions.margin_v
    ));

    // Narration: fade the voice itself in, then delay for the cover lead-in
    // so the fade never lands on the inserted silence, then pad the tail.
    inputs.extend(["-i".into(), job.audio_track.to_string_lossy().into_owned()]);
    let audio_idx = next_input();
    let mut voice_filter = format!(
        "[{}:a]afade=t=in:st=0:d={},",
        audio_idx,
        ms_to_secs_str(config.fade_in_ms)
    );
    if cover_ms > 0 {
        voice_filter.push_str(&format!("adelay={0}|{0},", cover_ms));
    }
    voice_filter.push_str(&format!(
        "apad=pad_dur={},afade=t=out:st={}:d={}[voice]",
        ms_to_secs_str(config.tail_ms),
        ms_to_secs_str(fade_out_start),
        ms_to_secs_str(config.fade_out_ms)
    ));
    filters.push(voice_filter);

    if let Some(music) = &config.music_path {
        inputs.extend(["-i".into(), music.to_string_lossy().into_owned()]);
        let music_idx = next_input();
        filters.push(format!(
            "[{}:a]aloop=loop=-1:size=2e+09,volume={:.2},afade=t=in:st=0:d={},afade=t=out:st={}:d={}[music]",
            music_idx,
            config.music_volume,
            ms_to_secs_str(config.fade_in_ms),
            ms_to_secs_str(fade_out_start),
            ms_to_secs_str(config.fade_out_ms)
        ));
        filters.push(
            "[voice][music]amix=inputs=2:duration=first:dropout_transition=2[outa]".to_string(),
        );
    } else {
        filters.push("[voice]acopy[outa]".to_string());
    }

    let mut args: Vec<String> = vec!["-y".into()];
    args.extend(inputs);
    args.extend([
        "-filter_complex".into(),
        filters.join(";"),
        "-map".into(),
        "[outv]".into(),
        "-map".into(),
        "[outa]".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        "veryfast".into(),
        "-crf".into(),
        "23".into(),
        "-c:a".into(),
        "aac".into(),
        "-b:a".into(),
        "128k".into(),
        "-t".into(),
        ms_to_secs_str(total_ms),
        "-pix_fmt".into(),
        "yuv420p".into(),
        "-movflags".into(),
        "+faststart".into(),
        part_path(output).to_string_lossy().into_owned(),
    ]);

    Ok(args)
}

/// Screen time per slideshow image: entries are chunked evenly across the
/// images so picture changes line up with turn boundaries; the last image
/// absorbs the tail padding.
pub fn slideshow_durations_ms(
    entries: &[TimelineEntry],
    num_images: usize,
    total_ms: u64,
) -> Vec<u64> {
    if num_images == 0 {
        return Vec::new();
    }
    if entries.len() < num_images {
        let base = total_ms / num_images as u64;
        let mut durations = vec![base; num_images];
        // Keep the sum exact.
        durations[num_images - 1] += total_ms - base * num_images as u64;
        return durations;
    }

    let mut durations = Vec::with_capacity(num_images);
    let per_image = entries.len() as f64 / num_images as f64;
    let mut previous_end = 0u64;
    for i in 0..num_images {
        let last = if i == num_images - 1 {
            entries.len() - 1
        } else {
            ((i + 1) as f64 * per_image) as usize - 1
        };
        let end = entries[last.min(entries.len() - 1)].end_ms;
        durations.push(end - previous_end);
        previous_end = end;
    }
    // Last image stays up through the tail padding.
    if let Some(last) = durations.last_mut() {
        *last += total_ms.saturating_sub(previous_end);
    }
    durations
}

fn part_path(output: &Path) -> PathBuf {
    let mut os = output.as_os_str().to_owned();
    os.push(".part.mp4");
    PathBuf::from(os)
}

/// Escape a path for use inside the subtitles filter argument.
fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy().replace(':', "\\:").replace('\'', "\\'")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CaptionConfig;

    fn entries(durations: &[u64]) -> Vec<TimelineEntry> {
        let mut out = Vec::new();
        let mut cursor = 0;
        for (i, &d) in durations.iter().enumerate() {
            out.push(TimelineEntry { turn_index: i, start_ms: cursor, end_ms: cursor + d });
            cursor += d;
        }
        out
    }

    #[test]
    fn track_length_precondition_passes_exactly_at_the_timeline_end() {
        let entries = entries(&[500, 700]);
        assert!(check_track_length(1200, &entries, 0).is_ok());
        assert!(check_track_length(1150, &entries, 100).is_ok());
        assert!(check_track_length(1400, &entries, 100).is_err());
    }

    #[test]
    fn cue_without_an_entry_fails_the_precondition() {
        let entries = entries(&[500]);
        let cue = CaptionCue {
            turn_index: 7,
            speaker_id: "host".into(),
            start_ms: 0,
            end_ms: 100,
            text: "orphan".into(),
        };
        assert!(check_cue_coverage(&[cue], &entries).is_err());
        assert!(check_cue_coverage(&[], &entries).is_ok());
    }

    #[test]
    fn slideshow_durations_follow_turn_boundaries() {
        let entries = entries(&[1000, 1000, 2000, 1000]);
        let durations = slideshow_durations_ms(&entries, 2, 7000);
        // First image covers turns 0-1, second covers 2-3 plus the tail.
        assert_eq!(durations, vec![2000, 5000]);
        assert_eq!(durations.iter().sum::<u64>(), 7000);
    }

    #[test]
    fn slideshow_with_more_images_than_turns_splits_evenly() {
        let entries = entries(&[900]);
        let durations = slideshow_durations_ms(&entries, 3, 1000);
        assert_eq!(durations.len(), 3);
        assert_eq!(durations.iter().sum::<u64>(), 1000);
    }

    #[test]
    fn args_contain_subtitle_burn_and_output_part_path() {
        let entries = entries(&[500, 700]);
        let job = RenderJob {
            audio_track: Path::new("/tmp/run/audio.mp3"),
            caption_track: Path::new("/tmp/run/captions.srt"),
            background: &BackgroundSpec::Image(PathBuf::from("/tmp/bg.jpg")),
            entries: &entries,
            cues: &[],
        };
        let args = build_ffmpeg_args(
            &job,
            &RenderConfig::default(),
            &CaptionConfig::default(),
            1200,
            job.caption_track,
            Path::new("/tmp/out/final.mp4"),
        )
        .unwrap();

        let joined = args.join(" ");
        assert!(joined.contains("subtitles="));
        assert!(joined.contains("force_style"));
        assert!(args.last().unwrap().ends_with("final.mp4.part.mp4"));
        assert!(joined.contains("libx264"));
    }

    #[test]
    fn looped_video_background_uses_stream_loop() {
        let entries = entries(&[1000]);
        let job = RenderJob {
            audio_track: Path::new("audio.mp3"),
            caption_track: Path::new("captions.srt"),
            background: &BackgroundSpec::LoopedVideo(PathBuf::from("loop.mp4")),
            entries: &entries,
            cues: &[],
        };
        let args = build_ffmpeg_args(
            &job,
            &RenderConfig::default(),
            &CaptionConfig::default(),
            1000,
            job.caption_track,
            Path::new("out.mp4"),
        )
        .unwrap();
        assert!(args.windows(2).any(|w| w[0] == "-stream_loop" && w[1] == "-1"));
    }

    #[test]
    fn cover_lead_in_delays_the_narration() {
        let entries = entries(&[1000]);
        let job = RenderJob {
            audio_track: Path::new("audio.mp3"),
            caption_track: Path::new("captions.srt"),
            background: &BackgroundSpec::Image(PathBuf::from("bg.jpg")),
            entries: &entries,
            cues: &[],
        };
        let config = RenderConfig {
            cover_ms: 1500,
            cover_path: Some(PathBuf::from("cover.jpg")),
            ..RenderConfig::default()
        };
        let args = build_ffmpeg_args(
            &job,
            &config,
            &CaptionConfig::default(),
            1000,
            job.caption_track,
            Path::new("out.mp4"),
        )
        .unwrap();
        let filter = filter_complex(&args);
        assert!(filter.contains("adelay=1500|1500"));
        assert!(filter.contains("concat=n=2"));
    }

    fn filter_complex(args: &[String]) -> String {
        args.windows(2)
            .find(|w| w[0] == "-filter_complex")
            .map(|w| w[1].clone())
            .unwrap()
    }

    fn cue(turn_index: usize, start_ms: u64, end_ms: u64, text: &str) -> CaptionCue {
        CaptionCue {
            turn_index,
            speaker_id: "host".into(),
            start_ms,
            end_ms,
            text: text.into(),
        }
    }

    #[test]
    fn cover_lead_in_shifts_burned_captions() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("captions.srt");
        let cues = vec![cue(0, 0, 500, "Hello"), cue(1, 500, 1200, "World")];
        let caption_config = CaptionConfig::default();
        srt::write_srt(&cues, &caption_config, &track).unwrap();

        let entries = entries(&[500, 700]);
        let job = RenderJob {
            audio_track: Path::new("audio.mp3"),
            caption_track: &track,
            background: &BackgroundSpec::Image(PathBuf::from("bg.jpg")),
            entries: &entries,
            cues: &cues,
        };
        let config = RenderConfig {
            cover_ms: 1500,
            cover_path: Some(PathBuf::from("cover.jpg")),
            ..RenderConfig::default()
        };

        let burn_track = burn_caption_track(&job, &config, &caption_config).unwrap();
        assert_ne!(burn_track, track, "shifted cues must not overwrite the persisted track");

        // Burned timestamps line up with the delayed narration.
        let parsed = srt::parse_srt(&burn_track).unwrap();
        assert_eq!(parsed[0].start_ms, 1500);
        assert_eq!(parsed[0].end_ms, 2000);
        assert_eq!(parsed[1].start_ms, 2000);

        // The persisted track keeps narration-relative times.
        let persisted = srt::parse_srt(&track).unwrap();
        assert_eq!(persisted[0].start_ms, 0);
    }

    #[test]
    fn unadjusted_cues_burn_the_persisted_track_directly() {
        let dir = tempfile::tempdir().unwrap();
        let track = dir.path().join("captions.srt");
        let cues = vec![cue(0, 400, 900, "Hi")];
        let caption_config = CaptionConfig::default();
        srt::write_srt(&cues, &caption_config, &track).unwrap();

        let entries = entries(&[500]);
        let job = RenderJob {
            audio_track: Path::new("audio.mp3"),
            caption_track: &track,
            background: &BackgroundSpec::Image(PathBuf::from("bg.jpg")),
            entries: &entries,
            cues: &cues,
        };

        let burn_track =
            burn_caption_track(&job, &RenderConfig::default(), &caption_config).unwrap();
        assert_eq!(burn_track, track);
    }

    #[test]
    fn first_cue_is_held_past_the_fade_in() {
        let cues = vec![cue(0, 0, 500, "Hello"), cue(1, 500, 1200, "World")];
        let adjusted = burn_cues(&cues, 0, 300);
        assert_eq!(adjusted[0].start_ms, 300);
        assert_eq!(adjusted[0].end_ms, 500);
        assert_eq!(adjusted[1], cues[1]);

        // A cue ending inside the fade never inverts.
        let tiny = burn_cues(&[cue(0, 0, 100, "Oh")], 0, 300);
        assert_eq!(tiny[0].start_ms, 100);
        assert_eq!(tiny[0].end_ms, 100);

        // With a cover longer than the fade the shift already clears it.
        let covered = burn_cues(&cues, 1500, 300);
        assert_eq!(covered[0].start_ms, 1500);
    }

    #[test]
    fn narration_fade_in_precedes_the_cover_delay() {
        let entries = entries(&[1000]);
        let job = RenderJob {
            audio_track: Path::new("audio.mp3"),
            caption_track: Path::new("captions.srt"),
            background: &BackgroundSpec::Image(PathBuf::from("bg.jpg")),
            entries: &entries,
            cues: &[],
        };
        let config = RenderConfig {
            cover_ms: 1500,
            cover_path: Some(PathBuf::from("cover.jpg")),
            ..RenderConfig::default()
        };
        let args = build_ffmpeg_args(
            &job,
            &config,
            &CaptionConfig::default(),
            1000,
            job.caption_track,
            Path::new("out.mp4"),
        )
        .unwrap();
        let filter = filter_complex(&args);
        let fade_in = filter.find("afade=t=in").unwrap();
        let delay = filter.find("adelay=").unwrap();
        assert!(fade_in < delay, "fade-in must act on the voice, not the lead-in silence");
        assert!(filter.contains("fade=t=in:st=0"));
    }

    #[test]
    fn music_bed_fades_in_and_out() {
        let entries = entries(&[1000]);
        let job = RenderJob {
            audio_track: Path::new("audio.mp3"),
            caption_track: Path::new("captions.srt"),
            background: &BackgroundSpec::Image(PathBuf::from("bg.jpg")),
            entries: &entries,
            cues: &[],
        };
        let config = RenderConfig {
            music_path: Some(PathBuf::from("bed.mp3")),
            ..RenderConfig::default()
        };
        let args = build_ffmpeg_args(
            &job,
            &config,
            &CaptionConfig::default(),
            1000,
            job.caption_track,
            Path::new("out.mp4"),
        )
        .unwrap();
        let filter = filter_complex(&args);
        assert_eq!(filter.matches("afade=t=in:st=0").count(), 2);
        assert_eq!(filter.matches("afade=t=out").count(), 2);
        assert!(filter.contains("amix=inputs=2"));
    }
}
