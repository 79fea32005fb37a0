//! HTTP utilities for Azure Resource Manager calls

use anyhow::{Context, Result};
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use url::Url;

use super::api::ApiError;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Header carrying the caller-chosen correlation id
pub const CLIENT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Header carrying the service-assigned request id
pub const REQUEST_ID_HEADER: &str = "x-ms-request-id";

/// Truncate long bodies and drop control characters before logging
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// `{"error": {"code": ..., "message": ...}}`
#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// A successful response
#[derive(Debug)]
pub struct ArmResponse {
    pub status: StatusCode,
    pub body: String,
    pub request_id: Option<String>,
}

impl ArmResponse {
    pub fn json(&self) -> Result<Value, ApiError> {
        if self.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Map a non-success status to the client error taxonomy
fn classify(status: StatusCode, body: &str, request_id: Option<String>) -> ApiError {
    if status == StatusCode::NOT_FOUND {
        return ApiError::NotFound { request_id };
    }

    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let code = if envelope.error.code.is_empty() {
        status
            .canonical_reason()
            .unwrap_or("Unknown")
            .replace(' ', "")
    } else {
        envelope.error.code
    };
    ApiError::Remote {
        status: status.as_u16(),
        code,
        message: envelope.error.message,
        request_id,
    }
}

/// HTTP client wrapper for ARM calls
#[derive(Clone)]
pub struct ArmHttpClient {
    client: Client,
}

impl ArmHttpClient {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("azmon/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Send one request. Every call carries a fresh client request id, and
    /// the service request id is attached to both success and failure.
    pub async fn send(
        &self,
        method: Method,
        url: &Url,
        token: &str,
        body: Option<&Value>,
    ) -> Result<ArmResponse, ApiError> {
        let client_request_id = uuid::Uuid::new_v4().to_string();
        tracing::debug!("{} {} ({})", method, url, client_request_id);

        let mut request = self
            .client
            .request(method.clone(), url.clone())
            .bearer_auth(token)
            .header(CLIENT_REQUEST_ID_HEADER, &client_request_id);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        let status = response.status();
        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Transport(e.to_string()))?;

        if !status.is_success() {
            let err = classify(status, &body, request_id);
            if err.is_not_found() {
                tracing::debug!("{} {} -> 404", method, url);
            } else {
                // Only log sanitized/truncated error body to avoid leaking sensitive data
                tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            }
            return Err(err);
        }

        tracing::debug!("{} {} -> {}", method, url, status);
        Ok(ArmResponse {
            status,
            body,
            request_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_truncates_on_char_boundary() {
        let body = "é".repeat(150);
        let out = sanitize_for_log(&body);
        assert!(out.contains("[truncated, 300 bytes total]"));
    }

    #[test]
    fn test_sanitize_strips_control_characters() {
        assert_eq!(sanitize_for_log("a\nb\tc d"), "abc d");
    }

    #[test]
    fn test_classify_reads_error_envelope() {
        let body = r#"{"error":{"code":"BadRequest","message":"severity must be 0-4"}}"#;
        match classify(StatusCode::BAD_REQUEST, body, Some("rid".to_string())) {
            ApiError::Remote {
                status,
                code,
                message,
                request_id,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "BadRequest");
                assert_eq!(message, "severity must be 0-4");
                assert_eq!(request_id.as_deref(), Some("rid"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_classify_without_envelope() {
        match classify(StatusCode::SERVICE_UNAVAILABLE, "<html>", None) {
            ApiError::Remote { code, message, .. } => {
                assert_eq!(code, "ServiceUnavailable");
                assert!(message.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(classify(StatusCode::NOT_FOUND, "", None).is_not_found());
    }
}
