//! Wire types for the LLM gateway.

use serde::{Deserialize, Serialize};

use crate::agent_core::types::{extract_text, ContentBlock, Message, MessageContent, Role, ToolCall};
use crate::backend::ToolDescriptor;

// ─── Request Types ──────────────────────────────────────────────────────────

/// A history message projected to what the gateway needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    pub role: Role,
    pub content: MessageContent,
}

impl From<&Message> for GatewayMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role,
            content: message.content.clone(),
        }
    }
}

/// Request body for one completion.
#[derive(Debug, Clone, Serialize)]
pub struct GatewayRequest {
    pub conversation_id: String,
    pub messages: Vec<GatewayMessage>,
    pub tools: Vec<ToolDescriptor>,
    pub streaming: bool,
}

// ─── Response Types ─────────────────────────────────────────────────────────

/// Completion returned by the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub content: MessageContent,
}

/// A response reduced to what the orchestrator acts on.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    /// Concatenation of all text blocks.
    pub text: String,
    /// The first tool call in the response, if any. Later ones are ignored.
    pub tool_call: Option<ToolCall>,
}

impl ParsedResponse {
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.tool_call.is_none()
    }

    /// Content blocks for the assistant message recording this response.
    pub fn into_blocks(self) -> Vec<ContentBlock> {
        let mut blocks = Vec::with_capacity(2);
        if !self.text.trim().is_empty() {
            blocks.push(ContentBlock::Text { text: self.text });
        }
        if let Some(call) = self.tool_call {
            blocks.push(ContentBlock::ToolCall(call));
        }
        blocks
    }
}

/// A fresh `call_<uuid>` tool-call id.
pub fn generate_call_id() -> String {
    format!("call_{}", uuid::Uuid::new_v4())
}

impl GatewayResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: MessageContent::Text(text.into()),
        }
    }

    pub fn blocks(blocks: Vec<ContentBlock>) -> Self {
        Self {
            content: MessageContent::Blocks(blocks),
        }
    }

    /// Take the text and the first tool call. A tool call without an id is
    /// given a generated `call_<uuid>` id.
    pub fn parse(&self) -> ParsedResponse {
        let text = extract_text(&self.content);

        let extra_calls = self
            .content
            .blocks()
            .iter()
            .filter(|b| matches!(b, ContentBlock::ToolCall(_)))
            .count()
            .saturating_sub(1);
        if extra_calls > 0 {
            tracing::warn!(
                ignored = extra_calls,
                "gateway returned more than one tool call, keeping the first"
            );
        }

        let tool_call = self.content.blocks().iter().find_map(|b| match b {
            ContentBlock::ToolCall(call) => {
                let mut call = call.clone();
                if call.id.trim().is_empty() {
                    call.id = generate_call_id();
                }
                Some(call)
            }
            _ => None,
        });

        ParsedResponse { text, tool_call }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
