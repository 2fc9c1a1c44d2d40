//! Error types for the podgen pipeline.

use thiserror::Error;

/// Pipeline errors, classified per stage so the controller can decide
/// whether a failure is recoverable.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Script generation failed or produced malformed output. Fatal, not retried.
    #[error("Script generation error: {0}")]
    Generation(String),

    /// A single turn failed synthesis after retries were exhausted.
    #[error("Synthesis error for turn {turn_index}: {message}")]
    Synthesis { turn_index: usize, message: String },

    /// A downstream stage received a turn without a measured duration.
    /// Indicates a broken invariant in a prior stage, not a runtime condition.
    #[error("Assembly precondition violated: {0}")]
    AssemblyPrecondition(String),

    /// The rendering engine exited non-zero or produced no output.
    /// Fatal per attempt, never auto-retried; carries the engine's stderr.
    #[error("Render error: {message}")]
    Render { message: String, diagnostics: String },

    /// Pipeline state could not be persisted. Fatal: losing resume
    /// capability silently is unacceptable.
    #[error("State persistence error: {0}")]
    Persistence(String),

    /// The run was cancelled; state was persisted before exiting.
    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors surfaced by a TTS provider for a single synthesis call.
#[derive(Debug, Error)]
pub enum TtsError {
    /// Rate limits, timeouts, 5xx responses. Worth retrying with backoff.
    #[error("Transient TTS error: {0}")]
    Transient(String),

    /// Bad credentials, unknown voice, rejected input. Retrying cannot help.
    #[error("Permanent TTS error: {0}")]
    Permanent(String),
}

impl TtsError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, TtsError::Transient(_))
    }
}

impl From<reqwest::Error> for TtsError {
    fn from(e: reqwest::Error) -> Self {
        // Connectivity and timeout failures are transient; everything the
        // server actively rejected is handled at the status-code site.
        if e.is_timeout() || e.is_connect() || e.is_request() {
            TtsError::Transient(e.to_string())
        } else {
            TtsError::Permanent(e.to_string())
        }
    }
}

impl From<std::io::Error> for TtsError {
    fn from(e: std::io::Error) -> Self {
        TtsError::Permanent(e.to_string())
    }
}

/// Result type for the podgen pipeline.
pub type Result<T> = std::result::Result<T, PipelineError>;
