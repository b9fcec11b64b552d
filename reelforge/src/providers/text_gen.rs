//! Text generation client: ideas, scripts, and publication metadata.

use crate::resilience::{CallError, CallOptions, HttpRequest, OperationClass, ResilientCaller};
use crate::validate;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SERVICE: &str = "textgen";

/// Target spoken length: roughly 45 seconds at a natural pace.
pub const SCRIPT_TARGET_WORDS: usize = 160;

/// Accepted script length after whitespace normalization.
const SCRIPT_WORD_BOUNDS: (usize, usize) = (40, 400);

/// Draft publication metadata from the generator, before limits are applied.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetadataDraft {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
}

/// Text generation capability.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generates `count` short-form video title ideas.
    async fn generate_ideas(&self, count: usize) -> Result<Vec<String>, CallError>;

    /// Generates a narration script of about [`SCRIPT_TARGET_WORDS`] words.
    async fn generate_script(
        &self,
        title: &str,
        idempotency_key: &str,
    ) -> Result<String, CallError>;

    /// Generates a title/description/tags draft for publication.
    async fn generate_metadata(
        &self,
        title: &str,
        script: &str,
        idempotency_key: &str,
    ) -> Result<MetadataDraft, CallError>;
}

/// HTTP text generation client.
pub struct HttpTextGenerator {
    base_url: String,
    api_key: String,
    caller: Arc<ResilientCaller>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    text: String,
}

#[derive(Deserialize)]
struct IdeasResponse {
    ideas: Vec<String>,
}

impl HttpTextGenerator {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, caller: Arc<ResilientCaller>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            caller,
        }
    }

    fn options(&self, idempotency_key: Option<&str>) -> CallOptions {
        CallOptions {
            max_attempts: 3,
            idempotency_key: idempotency_key.map(str::to_string),
            ..Default::default()
        }
    }
}

/// Validates a generated script: dangerous patterns and plausible length.
pub(crate) fn validate_script(raw: &str) -> Result<String, CallError> {
    let script = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    validate::check_text(&script, "script")?;
    let words = script.split(' ').filter(|w| !w.is_empty()).count();
    let (min, max) = SCRIPT_WORD_BOUNDS;
    if words < min || words > max {
        return Err(CallError::Validation(
            crate::validate::ValidationError::NotAllowed {
                field: format!("script word count {}", words),
            },
        ));
    }
    Ok(script)
}

#[async_trait]
impl TextGenerator for HttpTextGenerator {
    async fn generate_ideas(&self, count: usize) -> Result<Vec<String>, CallError> {
        let body = serde_json::json!({
            "task": "shorts_ideas",
            "count": count,
        });
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Generation,
                HttpRequest::post(format!("{}/v1/generate", self.base_url))
                    .bearer(&self.api_key)
                    .json_body(&body),
                self.options(None),
            )
            .await?;

        let value: serde_json::Value = response.json()?;
        validate::check_allowed_keys(&value, &["ideas"], "ideas response")?;
        let ideas: IdeasResponse = response.json()?;

        let mut cleaned = Vec::with_capacity(ideas.ideas.len());
        for idea in ideas.ideas.into_iter().take(count) {
            let idea = idea.trim().to_string();
            validate::check_cell(&idea, "idea title")?;
            if !idea.is_empty() {
                cleaned.push(idea);
            }
        }
        Ok(cleaned)
    }

    async fn generate_script(
        &self,
        title: &str,
        idempotency_key: &str,
    ) -> Result<String, CallError> {
        let body = serde_json::json!({
            "task": "shorts_script",
            "title": title,
            "target_words": SCRIPT_TARGET_WORDS,
        });
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Generation,
                HttpRequest::post(format!("{}/v1/generate", self.base_url))
                    .bearer(&self.api_key)
                    .json_body(&body),
                self.options(Some(idempotency_key)),
            )
            .await?;

        let value: serde_json::Value = response.json()?;
        validate::check_allowed_keys(&value, &["text"], "script response")?;
        let completion: CompletionResponse = response.json()?;
        validate_script(&completion.text)
    }

    async fn generate_metadata(
        &self,
        title: &str,
        script: &str,
        idempotency_key: &str,
    ) -> Result<MetadataDraft, CallError> {
        let body = serde_json::json!({
            "task": "shorts_metadata",
            "title": title,
            "script": script,
        });
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Generation,
                HttpRequest::post(format!("{}/v1/generate", self.base_url))
                    .bearer(&self.api_key)
                    .json_body(&body),
                self.options(Some(idempotency_key)),
            )
            .await?;

        let value: serde_json::Value = response.json()?;
        validate::check_allowed_keys(&value, &["title", "description", "tags"], "metadata response")?;
        let draft: MetadataDraft = response.json()?;
        validate::check_text(&draft.title, "metadata title")?;
        validate::check_text(&draft.description, "metadata description")?;
        for tag in &draft.tags {
            validate::check_text(tag, "metadata tag")?;
        }
        Ok(draft)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_script_normalizes_whitespace() {
        let raw = "word ".repeat(100) + "\n\n  trailing";
        let script = validate_script(&raw).unwrap();
        assert!(!script.contains('\n'));
        assert!(!script.contains("  "));
    }

    #[test]
    fn validate_script_rejects_too_short() {
        assert!(validate_script("only five words right here").is_err());
    }

    #[test]
    fn validate_script_rejects_too_long() {
        let raw = "word ".repeat(500);
        assert!(validate_script(&raw).is_err());
    }

    #[test]
    fn validate_script_rejects_dangerous_content() {
        let raw = format!("{} <script>evil()</script>", "word ".repeat(100));
        assert!(validate_script(&raw).is_err());
    }

    #[test]
    fn validate_script_accepts_target_length() {
        let raw = "sentence ".repeat(SCRIPT_TARGET_WORDS);
        let script = validate_script(&raw).unwrap();
        assert_eq!(script.split(' ').count(), SCRIPT_TARGET_WORDS);
    }
}
