//! Caption building: turning turn text plus timeline offsets into cues.

pub mod srt;

use lazy_static::lazy_static;
use log::info;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::config::{CaptionConfig, CaptionGranularity};
use crate::error::{PipelineError, Result};
use crate::script::{Script, WordTiming};
use crate::timeline::{rescale_ms, TimelineEntry};

lazy_static! {
    /// Bracketed stage directions like `[laughs]` are TTS hints, not captions.
    static ref STAGE_DIRECTION: Regex = Regex::new(r"\[.*?\]").unwrap();
}

/// A single caption's text and time range on the final timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptionCue {
    pub turn_index: usize,
    pub speaker_id: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Build cues for every turn from its timeline entry and text.
///
/// When the turn carries word-level timings from the TTS provider they are
/// used exactly; otherwise each fragment's share of the turn duration is
/// estimated proportionally to its character count. Either way, cues never
/// extend outside their turn's entry and never overlap within a turn.
pub fn build_captions(
    script: &Script,
    entries: &[TimelineEntry],
    config: &CaptionConfig,
) -> Result<Vec<CaptionCue>> {
    let mut cues = Vec::new();

    for turn in &script.turns {
        let entry = entries
            .iter()
            .find(|e| e.turn_index == turn.index)
            .ok_or_else(|| {
                PipelineError::AssemblyPrecondition(format!(
                    "no timeline entry for turn {}",
                    turn.index
                ))
            })?;

        let text = strip_stage_directions(&turn.text);
        if text.is_empty() {
            continue;
        }

        let artifact = turn.measured()?;
        let turn_cues = match &artifact.word_timings {
            Some(words) if !words.is_empty() => {
                cues_from_word_timings(turn.index, &turn.speaker_id, words, entry, config)
            }
            _ => cues_proportional(turn.index, &turn.speaker_id, &text, entry, config),
        };
        cues.extend(turn_cues);
    }

    info!("Built {} caption cues for {} turns", cues.len(), script.len());
    Ok(cues)
}

/// Map cues onto a new time base after tempo adjustment, preserving order
/// and containment against an equally rescaled timeline.
pub fn rescale_cues(cues: &[CaptionCue], speed_ratio: f64) -> Vec<CaptionCue> {
    cues.iter()
        .map(|c| CaptionCue {
            start_ms: rescale_ms(c.start_ms, speed_ratio),
            end_ms: rescale_ms(c.end_ms, speed_ratio),
            ..c.clone()
        })
        .collect()
}

/// Move every cue later by a fixed offset, for tracks burned into a video
/// whose narration starts after a lead-in.
pub fn shift_cues(cues: &[CaptionCue], offset_ms: u64) -> Vec<CaptionCue> {
    cues.iter()
        .map(|c| CaptionCue {
            start_ms: c.start_ms + offset_ms,
            end_ms: c.end_ms + offset_ms,
            ..c.clone()
        })
        .collect()
}

pub fn strip_stage_directions(text: &str) -> String {
    let stripped = STAGE_DIRECTION.replace_all(text, "");
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Exact path: group timed words into fragments per the configured
/// granularity, shift clip-relative offsets into the timeline, and clamp
/// into the owning entry.
fn cues_from_word_timings(
    turn_index: usize,
    speaker_id: &str,
    words: &[WordTiming],
    entry: &TimelineEntry,
    config: &CaptionConfig,
) -> Vec<CaptionCue> {
    let groups: Vec<&[WordTiming]> = match config.granularity {
        CaptionGranularity::Turn => vec![words],
        CaptionGranularity::Words(n) => words.chunks(n.max(1)).collect(),
        CaptionGranularity::Sentence => {
            let mut groups = Vec::new();
            let mut start = 0;
            for (i, word) in words.iter().enumerate() {
                if ends_sentence(&word.word) {
                    groups.push(&words[start..=i]);
                    start = i + 1;
                }
            }
            if start < words.len() {
                groups.push(&words[start..]);
            }
            groups
        }
    };

    let mut cues = Vec::new();
    let mut previous_end = entry.start_ms;
    for group in groups {
        let text = group
            .iter()
            .map(|w| w.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let text = strip_stage_directions(&text);
        if text.is_empty() {
            continue;
        }

        let start = (entry.start_ms + group[0].start_ms)
            .clamp(previous_end, entry.end_ms);
        let end = (entry.start_ms + group[group.len() - 1].end_ms)
            .clamp(start, entry.end_ms);

        cues.push(CaptionCue {
            turn_index,
            speaker_id: speaker_id.to_string(),
            start_ms: start,
            end_ms: end,
            text,
        });
        previous_end = end;
    }
    cues
}

/// Fallback path: distribute the entry duration across fragments by
/// character weight. The trailing fragment absorbs the rounding remainder so
/// the last cue ends exactly at the entry end.
fn cues_proportional(
    turn_index: usize,
    speaker_id: &str,
    text: &str,
    entry: &TimelineEntry,
    config: &CaptionConfig,
) -> Vec<CaptionCue> {
    let fragments = split_fragments(text, config.granularity);
    if fragments.is_empty() {
        return Vec::new();
    }

    let total_weight: usize = fragments.iter().map(|f| f.chars().count().max(1)).sum();
    let duration = entry.duration_ms();

    let mut cues = Vec::with_capacity(fragments.len());
    let mut cursor = entry.start_ms;
    let count = fragments.len();
    for (i, fragment) in fragments.into_iter().enumerate() {
        let end = if i == count - 1 {
            entry.end_ms
        } else {
            let weight = fragment.chars().count().max(1);
            let share = (duration as u128 * weight as u128 / total_weight as u128) as u64;
            (cursor + share).min(entry.end_ms)
        };

        cues.push(CaptionCue {
            turn_index,
            speaker_id: speaker_id.to_string(),
            start_ms: cursor,
            end_ms: end,
            text: fragment,
        });
        cursor = end;
    }
    cues
}

fn split_fragments(text: &str, granularity: CaptionGranularity) -> Vec<String> {
    match granularity {
        CaptionGranularity::Turn => vec![text.to_string()],
        CaptionGranularity::Words(n) => text
            .split_whitespace()
            .collect::<Vec<_>>()
            .chunks(n.max(1))
            .map(|chunk| chunk.join(" "))
            .collect(),
        CaptionGranularity::Sentence => {
            let mut fragments = Vec::new();
            let mut current = String::new();
            for word in text.split_whitespace() {
                if !current.is_empty() {
                    current.push(' ');
                }
                current.push_str(word);
                if ends_sentence(word) {
                    fragments.push(std::mem::take(&mut current));
                }
            }
            if !current.is_empty() {
                fragments.push(current);
            }
            fragments
        }
    }
}

fn ends_sentence(word: &str) -> bool {
    matches!(
        word.trim_end_matches(['"', '\'', ')', ']']).chars().last(),
        Some('.' | '!' | '?' | '。' | '！' | '？')
    )
}
