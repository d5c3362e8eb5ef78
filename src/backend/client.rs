//! HTTP client for the sandbox execution backend.
//!
//! Every backend operation is a `POST {base_url}/{operation}` with a JSON body
//! and a [`BackendResponse`] envelope in return.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde_json::Value;

use super::errors::BackendError;
use super::types::BackendResponse;

// ─── Constants ──────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default total request timeout. Shell commands can run for a while.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

// ─── Transport Trait ────────────────────────────────────────────────────────

/// Sends one operation to the backend and returns its result payload.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn invoke(&self, tool: &str, operation: &str, body: Value)
        -> Result<Value, BackendError>;
}

// ─── HttpBackend ────────────────────────────────────────────────────────────

/// Execution backend reached over HTTP+JSON.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl HttpBackend {
    /// Build a client. Does not check connectivity.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BackendError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(BackendError::ConfigError {
                reason: "backend base_url is empty".to_string(),
            });
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, operation: &str) -> String {
        format!("{}/{}", self.base_url, operation.trim_start_matches('/'))
    }
}

#[async_trait]
impl BackendTransport for HttpBackend {
    async fn invoke(
        &self,
        tool: &str,
        operation: &str,
        body: Value,
    ) -> Result<Value, BackendError> {
        let url = self.url_for(operation);
        let start = std::time::Instant::now();

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BackendError::Timeout {
                        tool: tool.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    BackendError::ConnectionFailed {
                        endpoint: url.clone(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(BackendError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| BackendError::InvalidResponse {
                reason: format!("failed to read response body: {e}"),
            })?;

        tracing::debug!(
            tool = %tool,
            operation = %operation,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "backend call returned"
        );

        parse_backend_response(tool, &body_text)
    }
}

/// Decode a backend envelope into the result payload or a tool failure.
pub fn parse_backend_response(tool: &str, body: &str) -> Result<Value, BackendError> {
    let envelope: BackendResponse =
        serde_json::from_str(body).map_err(|e| BackendError::InvalidResponse {
            reason: e.to_string(),
        })?;

    if envelope.success {
        Ok(envelope.result.unwrap_or(Value::Null))
    } else {
        Err(BackendError::ToolFailed {
            tool: tool.to_string(),
            message: envelope
                .error
                .unwrap_or_else(|| "Tool execution failed".to_string()),
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
