//! Trend ingest client.
//!
//! The trend source is optional: credentials may be absent, and the
//! upstream regularly answers 403. The supervisor treats any `auth` or
//! `client` failure from here as "source unavailable" and continues with
//! ideation only.

use crate::resilience::{CallError, CallOptions, HttpRequest, OperationClass, ResilientCaller};
use crate::validate;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SERVICE: &str = "trends";

/// One trending post from the categorized source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TrendPost {
    pub title: String,
    pub score: i64,
}

/// Trend listing capability.
#[async_trait]
pub trait TrendSource: Send + Sync {
    /// Recent posts with at least `min_score`, capped at `limit`.
    async fn fetch(&self, min_score: i64, limit: usize) -> Result<Vec<TrendPost>, CallError>;
}

/// HTTP trend source client with client-credential auth.
pub struct HttpTrendSource {
    base_url: String,
    client_id: String,
    client_secret: String,
    category: String,
    caller: Arc<ResilientCaller>,
}

#[derive(Deserialize)]
struct TrendResponse {
    posts: Vec<TrendPost>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

impl HttpTrendSource {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        category: impl Into<String>,
        caller: Arc<ResilientCaller>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            category: category.into(),
            caller,
        }
    }

    async fn access_token(&self) -> Result<String, CallError> {
        let body = serde_json::json!({
            "grant_type": "client_credentials",
            "client_id": self.client_id,
            "client_secret": self.client_secret,
        });
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Auth,
                HttpRequest::post(format!("{}/oauth/token", self.base_url)).json_body(&body),
                CallOptions {
                    max_attempts: 2,
                    ..Default::default()
                },
            )
            .await?;
        let value: serde_json::Value = response.json()?;
        validate::check_allowed_keys(&value, &["access_token", "expires_in"], "token response")?;
        let token: TokenResponse = response.json()?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl TrendSource for HttpTrendSource {
    async fn fetch(&self, min_score: i64, limit: usize) -> Result<Vec<TrendPost>, CallError> {
        let token = self.access_token().await?;
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Api,
                HttpRequest::get(format!(
                    "{}/v1/{}/hot?limit={}",
                    self.base_url,
                    self.category,
                    limit.clamp(1, 100)
                ))
                .bearer(&token),
                CallOptions {
                    max_attempts: 2,
                    ..Default::default()
                },
            )
            .await?;

        let value: serde_json::Value = response.json()?;
        validate::check_allowed_keys(&value, &["posts"], "trend response")?;
        let parsed: TrendResponse = response.json()?;

        let mut posts: Vec<TrendPost> = parsed
            .posts
            .into_iter()
            .filter(|p| p.score >= min_score)
            .filter(|p| validate::check_cell(&p.title, "trend title").is_ok())
            .collect();
        posts.sort_by(|a, b| b.score.cmp(&a.score));
        posts.truncate(limit);
        Ok(posts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trend_post_deserializes() {
        let post: TrendPost =
            serde_json::from_str(r#"{"title": "TIL about rust", "score": 4200}"#).unwrap();
        assert_eq!(post.score, 4200);
    }
}
