//! Agent Core error types.

use thiserror::Error;

/// Errors that can occur during agent core operations.
///
/// None of these cross the orchestrator boundary: the orchestrator logs them
/// or renders them into the transcript.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Database operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Session not found.
    #[error("session not found: '{session_id}'")]
    SessionNotFound { session_id: String },

    /// A stored row could not be decoded into a message.
    #[error("corrupt message {message_id} in session '{session_id}': {reason}")]
    CorruptMessage {
        session_id: String,
        message_id: String,
        reason: String,
    },

    /// Serialization error.
    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}
