//! SRT subtitle track writer and parser.
//!
//! SRT keeps millisecond precision, so cue timing round-trips losslessly.
//! Per-speaker styling rides on libass override tags (`{\anN}` placement,
//! `<font color>` for the primary color); font, size, outline and margins are
//! applied at render time through the subtitles filter's `force_style`, the
//! same split the original renderer used.

use std::path::Path;

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::CaptionConfig;
use crate::error::{PipelineError, Result};

use super::CaptionCue;

lazy_static! {
    static ref FONT_TAG: Regex = Regex::new(r"</?font[^>]*>").unwrap();
    static ref OVERRIDE_TAG: Regex = Regex::new(r"\{\\an\d\}").unwrap();
}

/// Timing and text recovered from an SRT file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Write cues as an SRT track, applying per-speaker color/placement tags.
pub fn write_srt(cues: &[CaptionCue], config: &CaptionConfig, path: &Path) -> Result<()> {
    let mut out = String::new();
    for (i, cue) in cues.iter().enumerate() {
        let mut text = cue.text.clone();
        if let Some(style) = config.speaker_styles.get(&cue.speaker_id) {
            if style.color != "&HFFFFFF&" {
                text = format!("<font color=\"{}\">{}</font>", ass_to_html_color(&style.color), text);
            }
            if style.alignment != 2 {
                text = format!("{{\\an{}}}{}", style.alignment, text);
            }
        }

        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            i + 1,
            format_timestamp(cue.start_ms),
            format_timestamp(cue.end_ms),
            text
        ));
    }

    std::fs::write(path, out)?;
    Ok(())
}

/// Parse an SRT file back into timing and plain text, stripping any styling
/// tags the writer added.
pub fn parse_srt(path: &Path) -> Result<Vec<ParsedCue>> {
    let content = std::fs::read_to_string(path)?;
    let mut cues = Vec::new();

    for block in content.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
        let mut lines = block.lines();
        // First line is the sequence number.
        lines.next();
        let timing = lines.next().ok_or_else(|| {
            PipelineError::AssemblyPrecondition(format!("SRT block without timing line: {:?}", block))
        })?;

        let (start_str, end_str) = timing.split_once("-->").ok_or_else(|| {
            PipelineError::AssemblyPrecondition(format!("malformed SRT timing line: {:?}", timing))
        })?;

        let raw_text = lines.collect::<Vec<_>>().join("\n");
        let text = OVERRIDE_TAG.replace_all(&raw_text, "");
        let text = FONT_TAG.replace_all(&text, "").to_string();

        cues.push(ParsedCue {
            start_ms: parse_timestamp(start_str.trim())?,
            end_ms: parse_timestamp(end_str.trim())?,
            text,
        });
    }

    Ok(cues)
}

/// Milliseconds to `HH:MM:SS,mmm`.
pub fn format_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// `HH:MM:SS,mmm` back to milliseconds.
pub fn parse_timestamp(s: &str) -> Result<u64> {
    let invalid = || PipelineError::AssemblyPrecondition(format!("invalid SRT timestamp: {:?}", s));

    let (clock, millis) = s.split_once(',').ok_or_else(invalid)?;
    let parts: Vec<&str> = clock.split(':').collect();
    if parts.len() != 3 {
        return Err(invalid());
    }

    let hours: u64 = parts[0].parse().map_err(|_| invalid())?;
    let minutes: u64 = parts[1].parse().map_err(|_| invalid())?;
    let seconds: u64 = parts[2].parse().map_err(|_| invalid())?;
    let millis: u64 = millis.parse().map_err(|_| invalid())?;

    Ok(((hours * 60 + minutes) * 60 + seconds) * 1000 + millis)
}

/// ASS `&HBBGGRR&` color to HTML `#RRGGBB`.
fn ass_to_html_color(ass: &str) -> String {
    let hex = ass.trim_start_matches("&H").trim_end_matches('&');
    if hex.len() == 6 {
        if let (Ok(b), Ok(g), Ok(r)) = (
            u8::from_str_radix(&hex[0..2], 16),
            u8::from_str_radix(&hex[2..4], 16),
            u8::from_str_radix(&hex[4..6], 16),
        ) {
            return format!("#{:02X}{:02X}{:02X}", r, g, b);
        }
    }
    "#FFFFFF".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpeakerStyle;
    use tempfile::tempdir;

    fn cue(turn_index: usize, speaker: &str, start_ms: u64, end_ms: u64, text: &str) -> CaptionCue {
        CaptionCue {
            turn_index,
            speaker_id: speaker.to_string(),
            start_ms,
            end_ms,
            text: text.to_string(),
        }
    }

    #[test]
    fn timestamps_round_trip_at_millisecond_precision() {
        for ms in [0u64, 1, 999, 1000, 59_999, 3_599_999, 3_600_001, 7_265_432] {
            assert_eq!(parse_timestamp(&format_timestamp(ms)).unwrap(), ms);
        }
    }

    #[test]
    fn tracks_round_trip_text_and_timing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("captions.srt");

        let mut config = CaptionConfig::default();
        config.speaker_styles.insert(
            "guest".to_string(),
            SpeakerStyle { color: "&H00D7FF&".to_string(), alignment: 1 },
        );

        let cues = vec![
            cue(0, "host", 0, 500, "Hello"),
            cue(1, "guest", 500, 1200, "World"),
        ];
        write_srt(&cues, &config, &path).unwrap();

        let parsed = parse_srt(&path).unwrap();
        assert_eq!(parsed.len(), 2);
        for (original, parsed) in cues.iter().zip(&parsed) {
            assert_eq!(parsed.start_ms, original.start_ms);
            assert_eq!(parsed.end_ms, original.end_ms);
            assert_eq!(parsed.text, original.text);
        }
    }

    #[test]
    fn styled_cue_carries_color_and_alignment_tags() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("captions.srt");

        let mut config = CaptionConfig::default();
        config.speaker_styles.insert(
            "guest".to_string(),
            SpeakerStyle { color: "&H0000FF&".to_string(), alignment: 1 },
        );

        write_srt(&[cue(0, "guest", 0, 1000, "Hi")], &config, &path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("{\\an1}"));
        assert!(content.contains("<font color=\"#FF0000\">"));
    }

    #[test]
    fn ass_color_converts_to_html() {
        assert_eq!(ass_to_html_color("&H0000FF&"), "#FF0000");
        assert_eq!(ass_to_html_color("&HFFFFFF&"), "#FFFFFF");
        assert_eq!(ass_to_html_color("garbage"), "#FFFFFF");
    }
}
