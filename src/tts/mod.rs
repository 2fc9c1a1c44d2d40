//! TTS provider seam.

pub mod elevenlabs;

pub use elevenlabs::ElevenLabsProvider;

use async_trait::async_trait;

use crate::error::TtsError;
use crate::script::WordTiming;

/// Audio returned by a provider for one turn.
#[derive(Debug, Clone)]
pub struct TtsAudio {
    /// Encoded audio bytes (mp3).
    pub audio: Vec<u8>,
    /// Duration in milliseconds as reported by the provider. The synthesis
    /// stage measures the written file via ffprobe and uses this as the
    /// fallback when the file cannot be probed.
    pub duration_ms: Option<u64>,
    /// Word-level timings relative to this clip, when available.
    pub word_timings: Option<Vec<WordTiming>>,
}

/// The external text-to-speech collaborator. One call per turn; the synthesis
/// stage owns all retry and backoff around it.
#[async_trait]
pub trait TtsProvider: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        speaker_id: &str,
    ) -> std::result::Result<TtsAudio, TtsError>;
}
