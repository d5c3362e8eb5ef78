//! Shared types for the agent core.
//!
//! Conversation messages, content blocks, and the tool invocation lifecycle
//! used across the adjacency repairer, approval queue, executor, continuation
//! scheduler, and orchestrator.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Identifiers ────────────────────────────────────────────────────────────

/// Opaque message identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ─── Roles ──────────────────────────────────────────────────────────────────

/// Message role. Tool results travel in `User` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Convert to database string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse from database string representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

// ─── Content Blocks ─────────────────────────────────────────────────────────

/// A tool call requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call.
    pub id: String,
    /// Tool name, e.g. `"read_file"`.
    pub name: String,
    /// Named parameters.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// The result of a tool call, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// The `ToolCall.id` this result answers.
    pub tool_call_id: String,
    /// Rendered result payload.
    pub content: String,
}

/// A single structured content block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolCall(ToolCall),
    ToolResult(ToolResult),
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self, ContentBlock::ToolResult(_))
    }
}

/// Message content: either a plain string or an ordered list of blocks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    /// The structured blocks of this content (empty for plain text).
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            MessageContent::Text(_) => &[],
            MessageContent::Blocks(blocks) => blocks,
        }
    }
}

// ─── Messages ───────────────────────────────────────────────────────────────

/// Marks assistant messages the orchestrator wrote on its own behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Transport or execution failure (`"Error: ..."`).
    Error,
    /// A tool call was refused by the loop guard.
    LoopDetected,
    /// A human denied one or more tool calls.
    Denied,
}

/// A single message in the conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: MessageContent,
    pub timestamp: DateTime<Utc>,
    /// Set on orchestrator-generated notices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<NoticeKind>,
    /// Lifecycle status of each tool call in this message, keyed by call id.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_status: BTreeMap<String, InvocationStatus>,
}

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            id: MessageId::new(),
            role,
            content,
            timestamp: Utc::now(),
            notice: None,
            tool_status: BTreeMap::new(),
        }
    }

    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    pub fn assistant_blocks(blocks: Vec<ContentBlock>) -> Self {
        Self::new(Role::Assistant, MessageContent::Blocks(blocks))
    }

    /// A `User`-role message carrying a single tool result.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(
            Role::User,
            MessageContent::Blocks(vec![ContentBlock::ToolResult(ToolResult {
                tool_call_id: tool_call_id.into(),
                content: content.into(),
            })]),
        )
    }

    /// An assistant-role notice written by the orchestrator.
    pub fn notice(kind: NoticeKind, text: impl Into<String>) -> Self {
        let mut msg = Self::assistant_text(text);
        msg.notice = Some(kind);
        msg
    }

    /// Whether this message is an error notice (suppresses auto-continuation).
    pub fn is_error_notice(&self) -> bool {
        self.role == Role::Assistant
            && matches!(
                self.notice,
                Some(NoticeKind::Error) | Some(NoticeKind::LoopDetected)
            )
    }

    /// Whether this message contains at least one tool result block.
    pub fn has_tool_result(&self) -> bool {
        self.content.blocks().iter().any(ContentBlock::is_tool_result)
    }

    /// Copy of this message with its content replaced by `blocks`.
    ///
    /// Identity, role, timestamp and metadata are preserved.
    pub fn with_blocks(&self, blocks: Vec<ContentBlock>) -> Self {
        Self {
            content: MessageContent::Blocks(blocks),
            ..self.clone()
        }
    }
}

/// All tool-call blocks in a message, in order.
pub fn extract_tool_calls(message: &Message) -> Vec<&ToolCall> {
    message
        .content
        .blocks()
        .iter()
        .filter_map(|block| match block {
            ContentBlock::ToolCall(call) => Some(call),
            _ => None,
        })
        .collect()
}

/// Concatenation of all text in `content`, ignoring tool blocks.
pub fn extract_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect(),
    }
}

// ─── Tool Invocations ───────────────────────────────────────────────────────

/// Lifecycle status of a tool invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvocationStatus {
    Pending,
    Approved,
    Executing,
    Completed,
    Denied,
    Error,
}

/// One tool invocation, created from a `ToolCall` and mutated through its
/// lifecycle. Exactly one exists per call id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Same as the originating `ToolCall.id`.
    pub id: String,
    pub name: String,
    pub params: serde_json::Map<String, serde_json::Value>,
    pub status: InvocationStatus,
}

impl ToolInvocation {
    /// Start a pending invocation for a model tool call.
    pub fn from_call(call: &ToolCall) -> Self {
        Self {
            id: call.id.clone(),
            name: call.name.clone(),
            params: call.params.clone(),
            status: InvocationStatus::Pending,
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            params: serde_json::Map::new(),
        }
    }

    #[test]
    fn test_extract_text_ignores_tool_blocks() {
        let content = MessageContent::Blocks(vec![
            ContentBlock::text("Reading "),
            ContentBlock::ToolCall(call("c1", "read_file")),
            ContentBlock::text("now."),
        ]);
        assert_eq!(extract_text(&content), "Reading now.");
    }

    #[test]
    fn test_extract_text_plain_string() {
        let content = MessageContent::Text("hello".to_string());
        assert_eq!(extract_text(&content), "hello");
    }

    #[test]
    fn test_extract_tool_calls_absent_is_empty() {
        let msg = Message::user_text("no tools here");
        assert!(extract_tool_calls(&msg).is_empty());
    }

    #[test]
    fn test_extract_tool_calls_in_order() {
        let msg = Message::assistant_blocks(vec![
            ContentBlock::ToolCall(call("c1", "read_file")),
            ContentBlock::text("and"),
            ContentBlock::ToolCall(call("c2", "write_file")),
        ]);
        let calls = extract_tool_calls(&msg);
        let ids: Vec<&str> = calls.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[test]
    fn test_content_block_wire_shape() {
        let block = ContentBlock::ToolCall(ToolCall {
            id: "c1".to_string(),
            name: "read_file".to_string(),
            params: serde_json::json!({"path": "a.txt"})
                .as_object()
                .cloned()
                .unwrap(),
        });
        let json = serde_json::to_value(&block).unwrap();
        assert_eq!(json["type"], "tool_call");
        assert_eq!(json["name"], "read_file");
        assert_eq!(json["params"]["path"], "a.txt");

        let result: ContentBlock = serde_json::from_str(
            r#"{"type":"tool_result","tool_call_id":"c1","content":"ok"}"#,
        )
        .unwrap();
        assert!(result.is_tool_result());
    }

    #[test]
    fn test_message_content_accepts_string_or_blocks() {
        let text: MessageContent = serde_json::from_str(r#""hi""#).unwrap();
        assert_eq!(text, MessageContent::Text("hi".to_string()));

        let blocks: MessageContent =
            serde_json::from_str(r#"[{"type":"text","text":"hi"}]"#).unwrap();
        assert_eq!(blocks.blocks().len(), 1);
    }

    #[test]
    fn test_error_notice_detection() {
        assert!(Message::notice(NoticeKind::Error, "Error: boom").is_error_notice());
        assert!(Message::notice(NoticeKind::LoopDetected, "loop").is_error_notice());
        assert!(!Message::notice(NoticeKind::Denied, "denied").is_error_notice());
        assert!(!Message::assistant_text("Error: looks like one").is_error_notice());
    }

    #[test]
    fn test_tool_result_message_is_user_role() {
        let msg = Message::tool_result("c1", "contents");
        assert_eq!(msg.role, Role::User);
        assert!(msg.has_tool_result());
    }

    #[test]
    fn test_role_roundtrip() {
        for role in [Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("tool"), None);
    }
}
