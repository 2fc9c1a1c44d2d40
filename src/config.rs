//! Pipeline configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Caption splitting granularity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CaptionGranularity {
    /// One cue per turn.
    Turn,
    /// One cue per sentence.
    Sentence,
    /// Fixed number of words per cue.
    Words(usize),
}

impl Default for CaptionGranularity {
    fn default() -> Self {
        Self::Sentence
    }
}

/// Visual style applied to one speaker's cues in the rendered subtitles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerStyle {
    /// Primary text color as ASS `&HBBGGRR&`.
    pub color: String,
    /// ASS numpad alignment (2 = bottom center, 1 = bottom left, 3 = bottom right).
    pub alignment: u8,
}

impl Default for SpeakerStyle {
    fn default() -> Self {
        Self {
            color: "&HFFFFFF&".to_string(),
            alignment: 2,
        }
    }
}

/// Synthesis stage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisConfig {
    /// Maximum number of in-flight TTS requests.
    pub max_concurrent_requests: usize,
    /// Attempt ceiling per turn, counting the first try.
    pub max_attempts: usize,
    /// Backoff before retry N is `base_backoff_ms * 2^(N-1)`.
    pub base_backoff_ms: u64,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 4,
            max_attempts: 3,
            base_backoff_ms: 500,
        }
    }
}

/// Caption builder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptionConfig {
    pub granularity: CaptionGranularity,
    pub font: String,
    pub font_size: u32,
    /// Vertical margin in pixels from the frame edge.
    pub margin_v: u32,
    /// Style per speaker id; speakers without an entry get the default style.
    pub speaker_styles: std::collections::HashMap<String, SpeakerStyle>,
}

impl Default for CaptionConfig {
    fn default() -> Self {
        Self {
            granularity: CaptionGranularity::default(),
            font: "Arial".to_string(),
            font_size: 24,
            margin_v: 20,
            speaker_styles: std::collections::HashMap::new(),
        }
    }
}

/// Background visuals for the rendered video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BackgroundSpec {
    /// A single still image shown for the whole video.
    Image(PathBuf),
    /// Still images cut in sequence, screen time split across the timeline.
    Slideshow(Vec<PathBuf>),
    /// A video file looped for the whole duration.
    LoopedVideo(PathBuf),
}

/// Render orchestrator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    /// Silence appended after the last turn, in milliseconds.
    pub tail_ms: u64,
    /// Audio/video fade-in length in milliseconds.
    pub fade_in_ms: u64,
    /// Audio/video fade-out length in milliseconds.
    pub fade_out_ms: u64,
    /// Optional cover still shown before the main visuals, in milliseconds.
    pub cover_ms: u64,
    pub cover_path: Option<PathBuf>,
    /// Optional music bed looped under the narration.
    pub music_path: Option<PathBuf>,
    /// Music bed volume relative to full scale.
    pub music_volume: f32,
    /// Allowed mismatch between measured track length and the timeline, in
    /// milliseconds, to absorb container rounding.
    pub duration_tolerance_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            tail_ms: 2000,
            fade_in_ms: 300,
            fade_out_ms: 300,
            cover_ms: 0,
            cover_path: None,
            music_path: None,
            music_volume: 0.1,
            duration_tolerance_ms: 150,
        }
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding per-run state records and synthesized artifacts.
    pub work_dir: PathBuf,
    /// Directory receiving the final video, one file per run.
    pub output_dir: PathBuf,
    /// Fixed silence inserted between consecutive turns, in milliseconds.
    pub gap_ms: u64,
    /// Playback speed applied to the finished track (0.5..=2.0). Values
    /// within 1% of 1.0 are treated as 1.0 and skipped.
    pub speed_ratio: f64,
    /// Continue to rendering with a trimmed script when some turns failed
    /// synthesis, instead of halting the run.
    pub proceed_on_partial_failure: bool,
    pub synthesis: SynthesisConfig,
    pub captions: CaptionConfig,
    pub render: RenderConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("podgen-work"),
            output_dir: PathBuf::from("podgen-output"),
            gap_ms: 0,
            speed_ratio: 1.0,
            proceed_on_partial_failure: false,
            synthesis: SynthesisConfig::default(),
            captions: CaptionConfig::default(),
            render: RenderConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Whether the configured speed ratio is far enough from 1.0 to matter.
    pub fn speed_adjustment_enabled(&self) -> bool {
        (self.speed_ratio - 1.0).abs() > 0.01
    }
}
