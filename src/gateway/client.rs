//! HTTP client for the LLM gateway.
//!
//! Sends the cleaned history and tool descriptors to `POST {base_url}/chat`
//! and returns the completion, either as one JSON body or folded from an SSE
//! stream when streaming is requested.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::errors::GatewayError;
use super::streaming::collect_sse;
use super::types::{GatewayRequest, GatewayResponse};

// ─── Constants ──────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default total request timeout.
///
/// Long histories take the model a while before the first token, so this is
/// generous compared to the backend timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

// ─── Gateway Trait ──────────────────────────────────────────────────────────

/// Anything that can complete a conversation turn.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    async fn complete(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError>;
}

// ─── HttpGateway ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HttpGateway {
    http: HttpClient,
    base_url: String,
    timeout: Duration,
}

impl HttpGateway {
    /// Build a client. Does not check connectivity.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GatewayError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(GatewayError::ConfigError {
                reason: "gateway base_url is empty".to_string(),
            });
        }

        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::ConnectionFailed {
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
}

#[async_trait]
impl LlmGateway for HttpGateway {
    async fn complete(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let url = format!("{}/chat", self.base_url);
        let streaming = request.streaming;

        tracing::info!(
            conversation_id = %request.conversation_id,
            message_count = request.messages.len(),
            tool_count = request.tools.len(),
            streaming,
            "sending gateway request"
        );

        let mut builder = self.http.post(&url).json(&request);
        if streaming {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout {
                    duration_secs: self.timeout.as_secs(),
                }
            } else {
                GatewayError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));
        if is_sse {
            return collect_sse(response).await;
        }

        let body_text = response.text().await.map_err(|e| GatewayError::InvalidResponse {
            reason: format!("failed to read response body: {e}"),
        })?;
        parse_gateway_response(&body_text)
    }
}

/// Decode a non-streaming gateway body.
pub fn parse_gateway_response(body: &str) -> Result<GatewayResponse, GatewayError> {
    serde_json::from_str(body).map_err(|e| GatewayError::InvalidResponse {
        reason: format!("failed to parse gateway response: {e}"),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::MessageContent;

    #[test]
    fn test_new_rejects_empty_base_url() {
        let err = HttpGateway::new("  ".trim(), DEFAULT_REQUEST_TIMEOUT).unwrap_err();
        assert!(matches!(err, GatewayError::ConfigError { .. }));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let gateway = HttpGateway::new("http://localhost:4000/v1/", DEFAULT_REQUEST_TIMEOUT).unwrap();
        assert_eq!(gateway.base_url(), "http://localhost:4000/v1");
    }

    #[test]
    fn test_parse_gateway_response_text() {
        let response = parse_gateway_response(r#"{"content":"Done."}"#).unwrap();
        assert_eq!(response.content, MessageContent::Text("Done.".to_string()));
    }

    #[test]
    fn test_parse_gateway_response_invalid() {
        let err = parse_gateway_response(r#"{"choices":[]}"#).unwrap_err();
        assert!(matches!(err, GatewayError::InvalidResponse { .. }));
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_connection_error() {
        let gateway = HttpGateway::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let request = GatewayRequest {
            conversation_id: "conv".to_string(),
            messages: vec![],
            tools: vec![],
            streaming: false,
        };
        let err = gateway.complete(request).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::ConnectionFailed { .. } | GatewayError::Timeout { .. }
        ));
    }
}
