//! Row store client over its REST surface.

use super::client::{DashboardClient, DashboardError, ListFilter, NewRow, RowPatch};
use super::row::{DashRow, RowStatus, ROW_COLUMNS};
use crate::resilience::{CallError, CallOptions, HttpRequest, OperationClass, ResilientCaller};
use crate::telemetry::redact_text;
use crate::validate;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

/// Service label for breakers and bulkheads.
const SERVICE: &str = "dashboard";

/// HTTP-backed dashboard adapter.
///
/// Wire shape: `GET/POST {base}/rows`, `GET/PATCH {base}/rows/{id}`,
/// `PUT {base}/headers`. Optimistic concurrency rides the
/// `If-Match-Status` header; the store answers 409 with the current row
/// when the check fails.
pub struct HttpDashboard {
    base_url: String,
    token: String,
    caller: Arc<ResilientCaller>,
}

#[derive(Deserialize)]
struct AppendResponse {
    id: String,
}

impl HttpDashboard {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, caller: Arc<ResilientCaller>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
            caller,
        }
    }

    fn options(&self) -> CallOptions {
        CallOptions {
            max_attempts: 3,
            ..Default::default()
        }
    }

    fn patch_body(patch: &RowPatch) -> Result<serde_json::Value, DashboardError> {
        let mut body = serde_json::Map::new();
        if let Some(status) = patch.status {
            body.insert("status".into(), status.as_str().into());
        }
        let cells = [
            ("script", &patch.script),
            ("audio_path", &patch.audio_path),
            ("video_path", &patch.video_path),
            ("published_url", &patch.published_url),
        ];
        for (column, value) in cells {
            if let Some(value) = value {
                body.insert(column.into(), validate::sanitize_cell(value, column)?.into());
            }
        }
        if let Some(error) = &patch.error {
            // The error column may carry provider messages; redact before it
            // leaves the process.
            let redacted = redact_text(error);
            body.insert("error".into(), validate::sanitize_cell(&redacted, "error")?.into());
        }
        body.insert(
            "updated_at".into(),
            chrono::Utc::now().to_rfc3339().into(),
        );
        Ok(serde_json::Value::Object(body))
    }

    fn parse_rows(body: &[u8]) -> Result<Vec<DashRow>, DashboardError> {
        serde_json::from_slice(body)
            .map_err(|e| DashboardError::Malformed(format!("row list: {}", e)))
    }
}

#[async_trait]
impl DashboardClient for HttpDashboard {
    async fn list_items(&self, filter: ListFilter) -> Result<Vec<DashRow>, DashboardError> {
        let mut url = format!("{}/rows", self.base_url);
        let mut query = Vec::new();
        if let Some(status) = filter.status {
            query.push(format!("status={}", urlencode(status.as_str())));
        }
        if let Some(since) = filter.updated_since {
            query.push(format!("updated_since={}", urlencode(&since.to_rfc3339())));
        }
        if !query.is_empty() {
            url = format!("{}?{}", url, query.join("&"));
        }

        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Api,
                HttpRequest::get(url).bearer(&self.token),
                self.options(),
            )
            .await?;
        let rows = Self::parse_rows(&response.body)?;
        // Server-side filtering is advisory; enforce locally as well.
        Ok(rows.into_iter().filter(|r| filter.matches(r)).collect())
    }

    async fn append_item(&self, row: NewRow) -> Result<String, DashboardError> {
        validate::check_cell(&row.title, "title")?;
        let body = serde_json::json!({
            "source": row.source,
            "title": row.title,
            "status": row.status.as_str(),
            "created_at": chrono::Utc::now().to_rfc3339(),
            "updated_at": chrono::Utc::now().to_rfc3339(),
        });
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Api,
                HttpRequest::post(format!("{}/rows", self.base_url))
                    .bearer(&self.token)
                    .json_body(&body),
                self.options(),
            )
            .await?;
        let appended: AppendResponse = response
            .json()
            .map_err(|e| DashboardError::Malformed(format!("append response: {}", e)))?;
        validate::check_filename(&appended.id, "id")?;
        Ok(appended.id)
    }

    async fn update_fields(
        &self,
        item_id: &str,
        patch: RowPatch,
        expected_status: Option<RowStatus>,
    ) -> Result<(), DashboardError> {
        validate::check_filename(item_id, "item_id")?;
        let body = Self::patch_body(&patch)?;
        let mut request = HttpRequest::patch(format!("{}/rows/{}", self.base_url, item_id))
            .bearer(&self.token)
            .json_body(&body);
        if let Some(expected) = expected_status {
            request = request.header("If-Match-Status", expected.as_str());
        }

        match self
            .caller
            .call(SERVICE, OperationClass::Api, request, self.options())
            .await
        {
            Ok(_) => Ok(()),
            Err(CallError::Client { status: 409, message }) => {
                let actual = RowStatus::parse(message.trim())
                    .ok_or_else(|| DashboardError::Malformed(format!("409 body: {}", message)))?;
                Err(DashboardError::Stale {
                    item_id: item_id.to_string(),
                    expected: expected_status.unwrap_or(actual),
                    actual,
                })
            }
            Err(CallError::Client { status: 404, .. }) => {
                Err(DashboardError::NotFound(item_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_item(&self, item_id: &str) -> Result<DashRow, DashboardError> {
        validate::check_filename(item_id, "item_id")?;
        let response = self
            .caller
            .call(
                SERVICE,
                OperationClass::Api,
                HttpRequest::get(format!("{}/rows/{}", self.base_url, item_id)).bearer(&self.token),
                self.options(),
            )
            .await;
        match response {
            Ok(response) => serde_json::from_slice(&response.body)
                .map_err(|e| DashboardError::Malformed(format!("row: {}", e))),
            Err(CallError::Client { status: 404, .. }) => {
                Err(DashboardError::NotFound(item_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn ensure_headers(&self) -> Result<(), DashboardError> {
        let body = serde_json::json!({ "columns": ROW_COLUMNS });
        self.caller
            .call(
                SERVICE,
                OperationClass::Api,
                HttpRequest::put(format!("{}/headers", self.base_url))
                    .bearer(&self.token)
                    .json_body(&body),
                self.options(),
            )
            .await?;
        Ok(())
    }
}

/// Minimal percent-encoding for query values.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencode_escapes_spaces_and_colons() {
        assert_eq!(urlencode("Pending Approval"), "Pending%20Approval");
        assert_eq!(urlencode("2025-06-01T09:00:00Z"), "2025-06-01T09%3A00%3A00Z");
    }

    #[test]
    fn patch_body_redacts_error_column() {
        let patch = RowPatch {
            error: Some("auth failed: api_key=sk-secret-123".to_string()),
            ..Default::default()
        };
        let body = HttpDashboard::patch_body(&patch).unwrap();
        let error = body["error"].as_str().unwrap();
        assert!(!error.contains("sk-secret-123"));
        assert!(error.contains("***"));
    }

    #[test]
    fn patch_body_rejects_dangerous_values() {
        let patch = RowPatch {
            script: Some("<script>alert(1)</script>".to_string()),
            ..Default::default()
        };
        assert!(HttpDashboard::patch_body(&patch).is_err());
    }

    #[test]
    fn patch_body_always_sets_updated_at() {
        let body = HttpDashboard::patch_body(&RowPatch::status(RowStatus::Completed)).unwrap();
        assert!(body.get("updated_at").is_some());
        assert_eq!(body["status"], "Completed");
    }
}
