//! Built-in tool handlers.
//!
//! Each handler shapes requests for one family of backend operations:
//! - read-path: `read_file`, `list_directory`, `search_files`
//! - write-path: `write_file`
//! - command-execution-path: `execute_command`
//! - session-management-path: `start_session`, `send_input`,
//!   `session_status`, `kill_session`, `get_preview_url`

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::client::BackendTransport;
use super::errors::BackendError;
use super::registry::{ToolHandler, ToolRegistry};
use super::types::{ExecutionContext, ToolDescriptor};

/// Optional params forwarded unchanged by the read-path handler.
const READ_PASSTHROUGH_PARAMS: &[&str] = &["pattern", "recursive", "max_results", "offset", "limit"];

// ─── Helpers ────────────────────────────────────────────────────────────────

fn base_body(ctx: &ExecutionContext) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("sandbox_id".into(), Value::String(ctx.sandbox_id.clone()));
    body.insert(
        "conversation_id".into(),
        Value::String(ctx.conversation_id.clone()),
    );
    body
}

/// Fetch a string param. `Ok(None)` when absent, error when not a string.
fn str_param<'a>(
    tool: &str,
    params: &'a Map<String, Value>,
    key: &str,
) -> Result<Option<&'a str>, BackendError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(BackendError::InvalidArguments {
            tool: tool.to_string(),
            reason: format!("'{key}' must be a string, got {other}"),
        }),
    }
}

fn required_str<'a>(
    tool: &str,
    params: &'a Map<String, Value>,
    key: &str,
) -> Result<&'a str, BackendError> {
    str_param(tool, params, key)?.ok_or_else(|| BackendError::InvalidArguments {
        tool: tool.to_string(),
        reason: format!("missing required field: '{key}'"),
    })
}

// ─── Read-path ──────────────────────────────────────────────────────────────

/// File reads, directory listings and searches.
pub struct PathReadHandler {
    transport: Arc<dyn BackendTransport>,
    operation: &'static str,
}

impl PathReadHandler {
    pub fn new(transport: Arc<dyn BackendTransport>, operation: &'static str) -> Self {
        Self {
            transport,
            operation,
        }
    }
}

#[async_trait]
impl ToolHandler for PathReadHandler {
    async fn call(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, BackendError> {
        let path = str_param(tool, params, "path")?.unwrap_or(".");
        if path.trim().is_empty() {
            return Err(BackendError::InvalidArguments {
                tool: tool.to_string(),
                reason: "'path' is empty".to_string(),
            });
        }

        let mut body = base_body(ctx);
        body.insert("path".into(), Value::String(path.to_string()));
        for key in READ_PASSTHROUGH_PARAMS {
            if let Some(v) = params.get(*key) {
                body.insert((*key).to_string(), v.clone());
            }
        }

        self.transport
            .invoke(tool, self.operation, Value::Object(body))
            .await
    }
}

// ─── Write-path ─────────────────────────────────────────────────────────────

/// File writes. Content may be empty but must be a string.
pub struct PathWriteHandler {
    transport: Arc<dyn BackendTransport>,
    operation: &'static str,
}

impl PathWriteHandler {
    pub fn new(transport: Arc<dyn BackendTransport>, operation: &'static str) -> Self {
        Self {
            transport,
            operation,
        }
    }
}

#[async_trait]
impl ToolHandler for PathWriteHandler {
    async fn call(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, BackendError> {
        let path = required_str(tool, params, "path")?;
        let content = required_str(tool, params, "content")?;

        let mut body = base_body(ctx);
        body.insert("path".into(), Value::String(path.to_string()));
        body.insert("content".into(), Value::String(content.to_string()));

        self.transport
            .invoke(tool, self.operation, Value::Object(body))
            .await
    }
}

// ─── Command-execution-path ─────────────────────────────────────────────────

/// One-shot shell commands.
pub struct CommandHandler {
    transport: Arc<dyn BackendTransport>,
    operation: &'static str,
}

impl CommandHandler {
    pub fn new(transport: Arc<dyn BackendTransport>, operation: &'static str) -> Self {
        Self {
            transport,
            operation,
        }
    }
}

#[async_trait]
impl ToolHandler for CommandHandler {
    async fn call(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, BackendError> {
        let command = required_str(tool, params, "command")?;
        if command.trim().is_empty() {
            return Err(BackendError::InvalidArguments {
                tool: tool.to_string(),
                reason: "'command' is empty".to_string(),
            });
        }

        let mut body = base_body(ctx);
        body.insert("command".into(), Value::String(command.to_string()));

        let cwd = str_param(tool, params, "cwd")?
            .map(str::to_string)
            .or_else(|| ctx.working_dir.clone());
        if let Some(cwd) = cwd {
            body.insert("cwd".into(), Value::String(cwd));
        }
        if let Some(timeout) = params.get("timeout_ms").and_then(Value::as_u64) {
            body.insert("timeout_ms".into(), json!(timeout));
        }

        self.transport
            .invoke(tool, self.operation, Value::Object(body))
            .await
    }
}

// ─── Session-management-path ────────────────────────────────────────────────

/// Long-running interactive sessions and preview URLs.
///
/// Params are forwarded as-is; the schema's `required` list is checked by the
/// registry before the handler runs.
pub struct SessionHandler {
    transport: Arc<dyn BackendTransport>,
    operation: &'static str,
}

impl SessionHandler {
    pub fn new(transport: Arc<dyn BackendTransport>, operation: &'static str) -> Self {
        Self {
            transport,
            operation,
        }
    }
}

#[async_trait]
impl ToolHandler for SessionHandler {
    async fn call(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, BackendError> {
        let mut body = base_body(ctx);
        for (key, value) in params {
            if key == "sandbox_id" || key == "conversation_id" {
                continue;
            }
            body.insert(key.clone(), value.clone());
        }

        self.transport
            .invoke(tool, self.operation, Value::Object(body))
            .await
    }
}

// ─── Registration ───────────────────────────────────────────────────────────

/// Register the built-in tool set against `transport`.
pub fn register_builtin_tools(registry: &mut ToolRegistry, transport: Arc<dyn BackendTransport>) {
    let read = |op| Arc::new(PathReadHandler::new(transport.clone(), op));
    registry.register(
        ToolDescriptor::new(
            "read_file",
            "Read the contents of a file in the sandbox.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the project root" },
                    "offset": { "type": "integer" },
                    "limit": { "type": "integer" }
                },
                "required": ["path"]
            }),
        ),
        read("files/read"),
    );
    registry.register(
        ToolDescriptor::new(
            "list_directory",
            "List files and directories at a path.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "default": "." },
                    "recursive": { "type": "boolean", "default": false }
                }
            }),
        ),
        read("files/list"),
    );
    registry.register(
        ToolDescriptor::new(
            "search_files",
            "Search file contents for a pattern.",
            json!({
                "type": "object",
                "properties": {
                    "pattern": { "type": "string" },
                    "path": { "type": "string", "default": "." },
                    "max_results": { "type": "integer" }
                },
                "required": ["pattern"]
            }),
        ),
        read("files/search"),
    );

    registry.register(
        ToolDescriptor::new(
            "write_file",
            "Create or overwrite a file in the sandbox.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        ),
        Arc::new(PathWriteHandler::new(transport.clone(), "files/write")),
    );

    registry.register(
        ToolDescriptor::new(
            "execute_command",
            "Run a shell command and return its output.",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "cwd": { "type": "string" },
                    "timeout_ms": { "type": "integer" }
                },
                "required": ["command"]
            }),
        ),
        Arc::new(CommandHandler::new(transport.clone(), "commands/execute")),
    );

    let session = |op| Arc::new(SessionHandler::new(transport.clone(), op));
    registry.register(
        ToolDescriptor::new(
            "start_session",
            "Start a long-running interactive process (dev server, REPL).",
            json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" },
                    "cwd": { "type": "string" }
                },
                "required": ["command"]
            }),
        ),
        session("sessions/start"),
    );
    registry.register(
        ToolDescriptor::new(
            "send_input",
            "Send input to an interactive session.",
            json!({
                "type": "object",
                "properties": {
                    "session_id": { "type": "string" },
                    "input": { "type": "string" }
                },
                "required": ["session_id", "input"]
            }),
        ),
        session("sessions/input"),
    );
    registry.register(
        ToolDescriptor::new(
            "session_status",
            "Get status and recent output of an interactive session.",
            json!({
                "type": "object",
                "properties": { "session_id": { "type": "string" } },
                "required": ["session_id"]
            }),
        ),
        session("sessions/status"),
    );
    registry.register(
        ToolDescriptor::new(
            "kill_session",
            "Terminate an interactive session.",
            json!({
                "type": "object",
                "properties": { "session_id": { "type": "string" } },
                "required": ["session_id"]
            }),
        ),
        session("sessions/kill"),
    );
    registry.register(
        ToolDescriptor::new(
            "get_preview_url",
            "Get the public URL for a port exposed by the sandbox.",
            json!({
                "type": "object",
                "properties": { "port": { "type": "integer" } },
                "required": ["port"]
            }),
        ),
        session("preview/url"),
    );

    tracing::info!(tool_count = registry.len(), "registered built-in tools");
}

// ─── Tests ──────────────────────────────────────────────────────────────────
