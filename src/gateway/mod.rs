//! LLM gateway client.
//!
//! This module handles all communication with the model gateway:
//! - The `LlmGateway` trait the orchestrator talks to
//! - Request/response wire types and response parsing
//! - An HTTP implementation with optional SSE streaming
//!
//! Prompt construction and model selection live on the gateway side.

pub mod client;
pub mod errors;
pub mod streaming;
pub mod types;

// Re-exports for convenience
pub use client::{HttpGateway, LlmGateway};
pub use errors::GatewayError;
pub use types::{GatewayMessage, GatewayRequest, GatewayResponse, ParsedResponse};
