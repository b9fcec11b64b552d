//! Stock clip search client.

use crate::resilience::{CallError, CallOptions, HttpRequest, OperationClass, ResilientCaller};
use crate::validate;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

const SERVICE: &str = "stock";

/// Minimum acceptable clip height; shorts are 1080x1920, anything under
/// 720p upscales badly.
const MIN_HEIGHT: u32 = 720;

/// Acceptable clip duration range.
const DURATION_BOUNDS: (Duration, Duration) = (Duration::from_secs(5), Duration::from_secs(60));

/// A downloadable stock clip candidate.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClipCandidate {
    pub id: String,
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
}

impl ClipCandidate {
    /// Portrait orientation: taller than wide.
    pub fn is_portrait(&self) -> bool {
        self.height > self.width
    }
}

/// Filters raw candidates down to usable portrait clips.
///
/// Keeps portrait orientation, at least [`MIN_HEIGHT`] vertical resolution,
/// and a duration inside [`DURATION_BOUNDS`]; orders by resolution so the
/// best material downloads first.
pub fn filter_candidates(mut candidates: Vec<ClipCandidate>) -> Vec<ClipCandidate> {
    candidates.retain(|c| {
        let duration = Duration::from_secs_f64(c.duration_secs.max(0.0));
        c.is_portrait()
            && c.height >= MIN_HEIGHT
            && duration >= DURATION_BOUNDS.0
            && duration <= DURATION_BOUNDS.1
            && c.url.starts_with("https://")
    });
    candidates.sort_by(|a, b| b.height.cmp(&a.height));
    candidates
}

/// Stock clip search capability.
#[async_trait]
pub trait ClipSearch: Send + Sync {
    /// Searches for portrait clips matching a keyword query.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ClipCandidate>, CallError>;
}

/// HTTP stock clip search client.
pub struct HttpClipSearch {
    base_url: String,
    api_key: String,
    caller: Arc<ResilientCaller>,
}

#[derive(Deserialize)]
struct SearchResponse {
    clips: Vec<ClipCandidate>,
}

impl HttpClipSearch {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, caller: Arc<ResilientCaller>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            caller,
        }
    }
}

#[async_trait]
impl ClipSearch for HttpClipSearch {
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<ClipCandidate>, CallError> {
        validate::check_text(query, "clip query")?;
        let url = format!(
            "{}/v1/search?query={}&orientation=portrait&per_page={}",
            self.base_url,
            query
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '+' })
                .collect::<String>(),
            limit.clamp(1, 50)
        );
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Search,
                HttpRequest::get(url).header("X-Api-Key", &self.api_key),
                CallOptions {
                    max_attempts: 3,
                    ..Default::default()
                },
            )
            .await?;

        let value: serde_json::Value = response.json()?;
        validate::check_allowed_keys(&value, &["clips"], "clip search response")?;
        let parsed: SearchResponse = response.json()?;
        for clip in &parsed.clips {
            validate::check_text(&clip.url, "clip url")?;
        }
        Ok(filter_candidates(parsed.clips))
    }
}
