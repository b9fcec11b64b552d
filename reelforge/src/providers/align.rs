//! Caption timing: word-level alignment and subtitle assembly.

use super::WordTiming;
use crate::resilience::{CallError, CallOptions, HttpRequest, OperationClass, ResilientCaller};
use crate::validate;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SERVICE: &str = "align";

/// Words per subtitle cue. Short cues read better on a phone screen.
const WORDS_PER_CUE: usize = 3;

/// Word-level alignment capability.
///
/// Only consulted when the TTS provider did not return timings inline.
#[async_trait]
pub trait CaptionAligner: Send + Sync {
    async fn align(
        &self,
        script: &str,
        audio: &[u8],
        idempotency_key: &str,
    ) -> Result<Vec<WordTiming>, CallError>;
}

/// HTTP alignment client.
pub struct HttpCaptionAligner {
    base_url: String,
    api_key: String,
    caller: Arc<ResilientCaller>,
}

#[derive(Deserialize)]
struct AlignResponse {
    words: Vec<WordTiming>,
}

impl HttpCaptionAligner {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, caller: Arc<ResilientCaller>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            caller,
        }
    }
}

#[async_trait]
impl CaptionAligner for HttpCaptionAligner {
    async fn align(
        &self,
        script: &str,
        audio: &[u8],
        idempotency_key: &str,
    ) -> Result<Vec<WordTiming>, CallError> {
        use base64::{engine::general_purpose::STANDARD, Engine as _};
        let body = serde_json::json!({
            "text": script,
            "audio_base64": STANDARD.encode(audio),
        });
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Generation,
                HttpRequest::post(format!("{}/v1/align", self.base_url))
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
        validate::check_allowed_keys(&value, &["words"], "alignment response")?;
        let parsed: AlignResponse = response.json()?;
        validate_timings(&parsed.words)?;
        Ok(parsed.words)
    }
}

/// Rejects alignment output that is empty or runs backwards.
pub(crate) fn validate_timings(timings: &[WordTiming]) -> Result<(), CallError> {
    if timings.is_empty() {
        return Err(CallError::Validation(
            crate::validate::ValidationError::Missing {
                field: "word timings".to_string(),
            },
        ));
    }
    for timing in timings {
        if timing.end_ms < timing.start_ms {
            return Err(CallError::Validation(
                crate::validate::ValidationError::NotAllowed {
                    field: format!("timing for {:?}", timing.word),
                },
            ));
        }
    }
    Ok(())
}

/// Formats a millisecond offset as an SRT timestamp.
fn srt_timestamp(ms: u64) -> String {
    let hours = ms / 3_600_000;
    let minutes = (ms % 3_600_000) / 60_000;
    let seconds = (ms % 60_000) / 1000;
    let millis = ms % 1000;
    format!("{:02}:{:02}:{:02},{:03}", hours, minutes, seconds, millis)
}

/// Builds an SRT document from word timings, grouping up to
/// [`WORDS_PER_CUE`] words per cue.
pub fn build_srt(timings: &[WordTiming]) -> String {
    let mut srt = String::new();
    for (index, group) in timings.chunks(WORDS_PER_CUE).enumerate() {
        let start = group.first().map(|t| t.start_ms).unwrap_or(0);
        let end = group.last().map(|t| t.end_ms).unwrap_or(start);
        let text = group
            .iter()
            .map(|t| t.word.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        srt.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            index + 1,
            srt_timestamp(start),
            srt_timestamp(end),
            text
        ));
    }
    srt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn word(word: &str, start_ms: u64, end_ms: u64) -> WordTiming {
        WordTiming {
            word: word.to_string(),
            start_ms,
            end_ms,
        }
    }

    #[test]
    fn srt_timestamps_format() {
        assert_eq!(srt_timestamp(0), "00:00:00,000");
        assert_eq!(srt_timestamp(61_250), "00:01:01,250");
        assert_eq!(srt_timestamp(3_600_000), "01:00:00,000");
    }

    #[test]
    fn srt_groups_words_into_cues() {
        let timings = vec![
            word("three", 0, 300),
            word("morning", 300, 700),
            word("habits", 700, 1100),
            word("that", 1100, 1300),
            word("stick", 1300, 1700),
        ];
        let srt = build_srt(&timings);

        assert!(srt.starts_with("1\n00:00:00,000 --> 00:00:01,100\nthree morning habits\n"));
        assert!(srt.contains("2\n00:00:01,100 --> 00:00:01,700\nthat stick\n"));
    }

    #[test]
    fn rejects_empty_timings() {
        assert!(validate_timings(&[]).is_err());
    }

    #[test]
    fn rejects_backwards_timings() {
        assert!(validate_timings(&[word("x", 500, 100)]).is_err());
    }
}
