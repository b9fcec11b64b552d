//! Text-to-speech client.

use super::WordTiming;
use crate::resilience::{CallError, CallOptions, HttpRequest, OperationClass, ResilientCaller};
use crate::validate;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SERVICE: &str = "tts";

/// Narration audio must land inside these bounds to be plausible for a
/// short: 8 seconds to 3 minutes.
const AUDIO_SIZE_BOUNDS: (usize, usize) = (16 * 1024, 8 * 1024 * 1024);

/// Synthesized narration: mono audio plus word timings when the provider
/// returns them inline. Absent timings are recovered later by the
/// alignment service.
#[derive(Debug, Clone)]
pub struct SynthesizedSpeech {
    pub audio: Vec<u8>,
    pub timings: Option<Vec<WordTiming>>,
}

/// Text-to-speech capability.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        script: &str,
        idempotency_key: &str,
    ) -> Result<SynthesizedSpeech, CallError>;
}

/// HTTP text-to-speech client.
///
/// The synthesis call returns JSON carrying base64 audio and optional
/// word-level timestamps.
pub struct HttpSpeechSynthesizer {
    base_url: String,
    api_key: String,
    voice: String,
    caller: Arc<ResilientCaller>,
}

#[derive(Deserialize)]
struct SynthesisResponse {
    audio_base64: String,
    #[serde(default)]
    timings: Option<Vec<WireTiming>>,
}

#[derive(Deserialize)]
struct WireTiming {
    word: String,
    start_ms: u64,
    end_ms: u64,
}

impl HttpSpeechSynthesizer {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        voice: impl Into<String>,
        caller: Arc<ResilientCaller>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            voice: voice.into(),
            caller,
        }
    }
}

/// Decodes the provider's base64 audio payload.
fn decode_base64(input: &str) -> Result<Vec<u8>, CallError> {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    let cleaned: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD.decode(cleaned).map_err(|e| CallError::Unexpected {
        message: format!("invalid base64 in audio payload: {}", e),
    })
}

/// Checks the decoded audio for plausible size.
pub(crate) fn validate_audio(audio: &[u8]) -> Result<(), CallError> {
    let (min, max) = AUDIO_SIZE_BOUNDS;
    if audio.len() < min || audio.len() > max {
        return Err(CallError::Validation(
            crate::validate::ValidationError::NotAllowed {
                field: format!("narration audio size {} bytes", audio.len()),
            },
        ));
    }
    Ok(())
}

#[async_trait]
impl SpeechSynthesizer for HttpSpeechSynthesizer {
    async fn synthesize(
        &self,
        script: &str,
        idempotency_key: &str,
    ) -> Result<SynthesizedSpeech, CallError> {
        let body = serde_json::json!({
            "text": script,
            "voice": self.voice,
            "format": "mp3",
            "channels": 1,
            "with_timestamps": true,
        });
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Generation,
                HttpRequest::post(format!("{}/v1/synthesize", self.base_url))
                    .bearer(&self.api_key)
                    .json_body(&body),
                CallOptions {
                    max_attempts: 3,
                    idempotency_key: Some(idempotency_key.to_string()),
                    ..Default::default()
                },
            )
            .await?;

        let value: serde_json::Value = response.json()?;
        validate::check_allowed_keys(&value, &["audio_base64", "timings"], "synthesis response")?;
        let parsed: SynthesisResponse = response.json()?;

        let audio = decode_base64(&parsed.audio_base64)?;
        validate_audio(&audio)?;

        let timings = parsed.timings.map(|wire| {
            wire.into_iter()
                .map(|t| WordTiming {
                    word: t.word,
                    start_ms: t.start_ms,
                    end_ms: t.end_ms,
                })
                .collect()
        });

        Ok(SynthesizedSpeech { audio, timings })
    }
}
