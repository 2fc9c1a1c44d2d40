//! ElevenLabs TTS client.
//!
//! Uses the `with-timestamps` endpoint so character alignment comes back with
//! the audio and can be folded into word-level timings for the caption
//! builder.

use std::collections::HashMap;

use async_trait::async_trait;
use base64::Engine;
use log::{debug, info};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use crate::error::TtsError;
use crate::script::WordTiming;

use super::{TtsAudio, TtsProvider};

const API_BASE: &str = "https://api.elevenlabs.io/v1";

/// TTS provider backed by the ElevenLabs text-to-speech API.
pub struct ElevenLabsProvider {
    client: Client,
    api_key: String,
    /// Maps pipeline speaker ids to ElevenLabs voice ids.
    voice_map: HashMap<String, String>,
    model_id: String,
}

#[derive(Debug, Deserialize)]
struct SpeechResponse {
    audio_base64: String,
    alignment: Option<Alignment>,
}

#[derive(Debug, Deserialize)]
struct Alignment {
    characters: Vec<String>,
    character_start_times_seconds: Vec<f64>,
    character_end_times_seconds: Vec<f64>,
}

impl ElevenLabsProvider {
    pub fn new(api_key: String, voice_map: HashMap<String, String>) -> Self {
        Self {
            client: Client::new(),
            api_key,
            voice_map,
            model_id: "eleven_multilingual_v2".to_string(),
        }
    }

    pub fn with_model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    fn voice_for(&self, speaker_id: &str) -> std::result::Result<&str, TtsError> {
        self.voice_map
            .get(speaker_id)
            .map(String::as_str)
            .ok_or_else(|| TtsError::Permanent(format!("unknown speaker: {}", speaker_id)))
    }
}

#[async_trait]
impl TtsProvider for ElevenLabsProvider {
    async fn synthesize(
        &self,
        text: &str,
        speaker_id: &str,
    ) -> std::result::Result<TtsAudio, TtsError> {
        let voice_id = self.voice_for(speaker_id)?;
        let url = format!("{}/text-to-speech/{}/with-timestamps", API_BASE, voice_id);

        debug!("Requesting TTS for speaker {} ({} chars)", speaker_id, text.len());
        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&json!({
                "text": text,
                "model_id": self.model_id,
                "output_format": "mp3_44100_128",
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = format!("ElevenLabs API error (status {}): {}", status, body);
            // Rate limits and server-side failures are worth retrying.
            return if status.as_u16() == 429 || status.is_server_error() {
                Err(TtsError::Transient(message))
            } else {
                Err(TtsError::Permanent(message))
            };
        }

        let body: SpeechResponse = response
            .json()
            .await
            .map_err(|e| TtsError::Permanent(format!("malformed TTS response: {}", e)))?;

        let audio = base64::engine::general_purpose::STANDARD
            .decode(&body.audio_base64)
            .map_err(|e| TtsError::Permanent(format!("invalid base64 audio: {}", e)))?;
        if audio.is_empty() {
            return Err(TtsError::Transient("received empty audio payload".to_string()));
        }

        let word_timings = body.alignment.as_ref().map(words_from_alignment);
        let duration_ms = word_timings
            .as_ref()
            .and_then(|words| words.last())
            .map(|last| last.end_ms);

        info!("Synthesized {} bytes for speaker {}", audio.len(), speaker_id);
        Ok(TtsAudio {
            audio,
            duration_ms,
            word_timings,
        })
    }
}

/// Fold per-character alignment into word timings, splitting on whitespace.
fn words_from_alignment(alignment: &Alignment) -> Vec<WordTiming> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut word_start_ms = 0u64;
    let mut word_end_ms = 0u64;

    for (i, ch) in alignment.characters.iter().enumerate() {
        let start_ms = (alignment.character_start_times_seconds.get(i).copied().unwrap_or(0.0)
            * 1000.0)
            .round() as u64;
        let end_ms = (alignment.character_end_times_seconds.get(i).copied().unwrap_or(0.0)
            * 1000.0)
            .round() as u64;

        if ch.chars().all(char::is_whitespace) {
            if !current.is_empty() {
                words.push(WordTiming {
                    word: std::mem::take(&mut current),
                    start_ms: word_start_ms,
                    end_ms: word_end_ms,
                });
            }
            continue;
        }

        if current.is_empty() {
            word_start_ms = start_ms;
        }
        current.push_str(ch);
        word_end_ms = end_ms;
    }

    if !current.is_empty() {
        words.push(WordTiming {
            word: current,
            start_ms: word_start_ms,
            end_ms: word_end_ms,
        });
    }

    words
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_folds_into_words() {
        let alignment = Alignment {
            characters: ["H", "i", " ", "y", "o", "u"].iter().map(|s| s.to_string()).collect(),
            character_start_times_seconds: vec![0.0, 0.1, 0.2, 0.3, 0.4, 0.5],
            character_end_times_seconds: vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6],
        };

        let words = words_from_alignment(&alignment);
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], WordTiming { word: "Hi".into(), start_ms: 0, end_ms: 200 });
        assert_eq!(words[1], WordTiming { word: "you".into(), start_ms: 300, end_ms: 600 });
    }

    #[test]
    fn trailing_word_is_flushed() {
        let alignment = Alignment {
            characters: vec!["a".to_string()],
            character_start_times_seconds: vec![0.0],
            character_end_times_seconds: vec![0.25],
        };
        let words = words_from_alignment(&alignment);
        assert_eq!(words.len(), 1);
        assert_eq!(words[0].end_ms, 250);
    }
}
