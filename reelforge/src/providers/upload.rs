//! Publication client: authenticated, chunked, resumable upload.

use crate::resilience::{CallError, CallOptions, HttpRequest, OperationClass, ResilientCaller};
use crate::validate;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const SERVICE: &str = "upload";

/// Bytes per upload chunk.
const CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Everything the publication service needs besides the video bytes.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub category_id: String,
    pub privacy: String,
    pub made_for_kids: bool,
}

/// Receipt from a completed upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationReceipt {
    pub id: String,
    pub url: String,
}

/// Publication capability.
#[async_trait]
pub trait VideoPublisher: Send + Sync {
    async fn publish(
        &self,
        video: &Path,
        request: UploadRequest,
        idempotency_key: &str,
        cancel: CancellationToken,
    ) -> Result<PublicationReceipt, CallError>;
}

/// HTTP publication client.
///
/// Session-style resumable protocol: one authenticated call opens a
/// session and returns an upload URL, the chunks stream to it with
/// `Content-Range` headers, and the final chunk's response carries the
/// published id. The idempotency key rides the session-open call, which is
/// the one with provider-side side effects.
pub struct HttpVideoPublisher {
    base_url: String,
    token: String,
    caller: Arc<ResilientCaller>,
}

#[derive(Deserialize)]
struct SessionResponse {
    upload_url: String,
}

#[derive(Deserialize)]
struct PublishedResponse {
    id: String,
    url: String,
}

impl HttpVideoPublisher {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, caller: Arc<ResilientCaller>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            caller,
        }
    }
}

#[async_trait]
impl VideoPublisher for HttpVideoPublisher {
    async fn publish(
        &self,
        video: &Path,
        request: UploadRequest,
        idempotency_key: &str,
        cancel: CancellationToken,
    ) -> Result<PublicationReceipt, CallError> {
        validate::check_cell(&request.title, "title")?;
        validate::check_cell(&request.description, "description")?;

        let bytes = tokio::fs::read(video).await.map_err(|e| CallError::Unexpected {
            message: format!("cannot read video {}: {}", video.display(), e),
        })?;
        let total = bytes.len();

        // Open the resumable session; this is where dedupe matters.
        let body = serde_json::json!({
            "title": request.title,
            "description": request.description,
            "tags": request.tags,
            "category_id": request.category_id,
            "privacy_status": request.privacy,
            "self_declared_made_for_kids": request.made_for_kids,
            "size_bytes": total,
        });
        let session = self
            .caller
            .call(
                SERVICE,
                OperationClass::Auth,
                HttpRequest::post(format!("{}/v1/videos", self.base_url))
                    .bearer(&self.token)
                    .json_body(&body),
                CallOptions {
                    max_attempts: 2,
                    idempotency_key: Some(idempotency_key.to_string()),
                    cancel: cancel.clone(),
                    ..Default::default()
                },
            )
            .await?;
        let value: serde_json::Value = session.json()?;
        validate::check_allowed_keys(&value, &["upload_url"], "upload session response")?;
        let session: SessionResponse = session.json()?;
        validate::check_text(&session.upload_url, "upload_url")?;

        // Stream the chunks.
        let mut last_response = None;
        for (index, chunk) in bytes.chunks(CHUNK_SIZE).enumerate() {
            let start = index * CHUNK_SIZE;
            let end = start + chunk.len() - 1;
            debug!(start, end, total, "uploading chunk");
            let mut chunk_request = HttpRequest::put(session.upload_url.clone())
                .bearer(&self.token)
                .header(
                    "Content-Range",
                    format!("bytes {}-{}/{}", start, end, total),
                );
            chunk_request.body = Some(chunk.to_vec());
            let response = self
                .caller
                .call(
                    SERVICE,
                    OperationClass::Api,
                    chunk_request,
                    CallOptions {
                        max_attempts: 3,
                        cancel: cancel.clone(),
                        ..Default::default()
                    },
                )
                .await?;
            last_response = Some(response);
        }

        let final_response = last_response.ok_or_else(|| CallError::Unexpected {
            message: "video file is empty".to_string(),
        })?;
        let value: serde_json::Value = final_response.json()?;
        validate::check_allowed_keys(&value, &["id", "url"], "publish response")?;
        let published: PublishedResponse = final_response.json()?;
        validate::check_text(&published.url, "published url")?;

        info!(id = %published.id, "video published");
        Ok(PublicationReceipt {
            id: published.id,
            url: published.url,
        })
    }
}
