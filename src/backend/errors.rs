//! Execution backend error types.

use thiserror::Error;

/// Errors that can occur while dispatching a tool to the execution backend.
///
/// The executor never propagates these: each one becomes an `Error` status on
/// the invocation plus an assistant notice in the transcript.
#[derive(Debug, Error)]
pub enum BackendError {
    /// TCP/HTTP connection to the backend failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// Non-2xx HTTP response from the backend.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The backend answered, but the payload could not be decoded.
    #[error("invalid backend response: {reason}")]
    InvalidResponse { reason: String },

    /// Tool not found in the dispatch table.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Tool call arguments failed validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The backend ran the operation and reported a failure.
    #[error("'{tool}' failed: {message}")]
    ToolFailed { tool: String, message: String },

    /// A tool call timed out.
    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// Backend configuration error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl BackendError {
    /// Whether the failure happened before the backend could act.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            BackendError::ConnectionFailed { .. }
                | BackendError::Timeout { .. }
                | BackendError::HttpError { .. }
        )
    }
}
