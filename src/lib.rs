//! podgen turns a multi-speaker dialogue script into a narrated, captioned
//! video: per-turn TTS synthesis with bounded concurrency and retry, exact
//! millisecond timeline assembly, caption cues synchronized to that timeline,
//! and a single FFmpeg render with burned-in styled subtitles over background
//! visuals.
//!
//! Runs are resumable: pipeline state is persisted after every stage, and
//! already-synthesized turns are never paid for twice.

pub mod caption;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod script;
pub mod script_gen;
pub mod state;
pub mod synthesis;
pub mod timeline;
pub mod tts;

pub use caption::{build_captions, CaptionCue};
pub use config::{BackgroundSpec, CaptionGranularity, PipelineConfig};
pub use error::{PipelineError, Result, TtsError};
pub use pipeline::Pipeline;
pub use progress::{PipelineEvent, PipelineObserver};
pub use script::{Script, Turn, TurnStatus};
pub use script_gen::ScriptGenerator;
pub use state::{PipelineState, RunStage};
pub use synthesis::{synthesize_script, SynthesisReport};
pub use timeline::{assemble_timeline, TimelineEntry};
pub use tts::{ElevenLabsProvider, TtsProvider};
