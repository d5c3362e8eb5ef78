//! LLM gateway error types.
//!
//! Structured logging is the caller's responsibility. The orchestrator renders
//! every variant into an `"Error: ..."` notice and pauses the conversation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// TCP/HTTP connection to the gateway failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The gateway did not respond within the configured timeout.
    #[error("gateway timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the gateway.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response body could not be decoded.
    #[error("invalid gateway response: {reason}")]
    InvalidResponse { reason: String },

    /// SSE stream parsing or chunk-level error.
    #[error("stream error: {reason}")]
    StreamError { reason: String },

    /// Configuration error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_display() {
        let err = GatewayError::HttpError {
            status: 502,
            body: "bad gateway".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP 502: bad gateway");
    }

    #[test]
    fn test_timeout_display() {
        let err = GatewayError::Timeout { duration_secs: 5 };
        assert_eq!(err.to_string(), "gateway timeout after 5s");
    }
}
