//! Tool registry: the name-indexed dispatch table.
//!
//! Provides:
//! - Registration of a tool descriptor together with its handler
//! - Descriptor listing for the LLM gateway request
//! - Required-argument validation before dispatch
//! - Dispatch by tool name, with a uniform error for unknown names

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::errors::BackendError;
use super::types::{ExecutionContext, ToolDescriptor};

// ─── Handler Trait ──────────────────────────────────────────────────────────

/// Performs one family of tool requests.
///
/// A handler may serve several tool names; `tool` is the name it was
/// registered under.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        tool: &str,
        params: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, BackendError>;
}

/// A registry entry.
#[derive(Clone)]
pub struct RegisteredTool {
    pub descriptor: ToolDescriptor,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

// ─── ToolRegistry ───────────────────────────────────────────────────────────

/// Name → (descriptor, handler). Adding a tool is one [`register`] call.
///
/// [`register`]: ToolRegistry::register
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A later registration under the same name replaces the
    /// earlier one.
    pub fn register(&mut self, descriptor: ToolDescriptor, handler: Arc<dyn ToolHandler>) {
        let name = descriptor.name.clone();
        if self
            .tools
            .insert(name.clone(), RegisteredTool { descriptor, handler })
            .is_some()
        {
            tracing::debug!(tool = %name, "replaced existing tool registration");
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|t| &t.descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// All tool names, sorted.
    pub fn tool_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// All descriptors, sorted by name so gateway requests are stable.
    pub fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut descriptors: Vec<ToolDescriptor> =
            self.tools.values().map(|t| t.descriptor.clone()).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate a tool call: tool exists and required params are present.
    ///
    /// Type checking of individual fields is left to the backend.
    pub fn validate_tool_call(
        &self,
        tool_name: &str,
        params: &Map<String, Value>,
    ) -> Result<(), BackendError> {
        let def = self.get_tool(tool_name).ok_or_else(|| BackendError::UnknownTool {
            name: tool_name.to_string(),
        })?;

        for field in def.required_params() {
            if !params.contains_key(field) {
                return Err(BackendError::InvalidArguments {
                    tool: tool_name.to_string(),
                    reason: format!("missing required field: '{field}'"),
                });
            }
        }

        Ok(())
    }

    /// Validate and run `tool_name`.
    pub async fn dispatch(
        &self,
        tool_name: &str,
        params: &Map<String, Value>,
        ctx: &ExecutionContext,
    ) -> Result<Value, BackendError> {
        self.validate_tool_call(tool_name, params)?;
        let entry = self.tools.get(tool_name).ok_or_else(|| BackendError::UnknownTool {
            name: tool_name.to_string(),
        })?;
        entry.handler.call(tool_name, params, ctx).await
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Records every call and echoes the params back.
    #[derive(Default)]
    struct EchoHandler {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolHandler for EchoHandler {
        async fn call(
            &self,
            tool: &str,
            params: &Map<String, Value>,
            _ctx: &ExecutionContext,
        ) -> Result<Value, BackendError> {
            self.calls.lock().unwrap().push(tool.to_string());
            Ok(Value::Object(params.clone()))
        }
    }

    fn descriptor(name: &str) -> ToolDescriptor {
        ToolDescriptor::new(
            name,
            format!("Test tool: {name}"),
            json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
        )
    }

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("read_file"), Arc::new(EchoHandler::default()));

        assert_eq!(registry.len(), 1);
        assert!(registry.get_tool("read_file").is_some());
        assert!(registry.get_tool("nonexistent").is_none());
    }

    #[test]
    fn test_descriptors_sorted() {
        let mut registry = ToolRegistry::new();
        let handler = Arc::new(EchoHandler::default());
        for name in ["write_file", "execute_command", "read_file"] {
            registry.register(descriptor(name), handler.clone());
        }
        let names: Vec<String> = registry.descriptors().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["execute_command", "read_file", "write_file"]);
        assert_eq!(registry.tool_names(), vec!["execute_command", "read_file", "write_file"]);
    }

    #[test]
    fn test_validate_missing_required_field() {
        let mut registry = ToolRegistry::new();
        registry.register(descriptor("read_file"), Arc::new(EchoHandler::default()));

        let err = registry
            .validate_tool_call("read_file", &Map::new())
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidArguments { .. }));
        assert!(registry
            .validate_tool_call("read_file", &params(json!({"path": "a.txt"})))
            .is_ok());
    }

    #[test]
    fn test_validate_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.validate_tool_call("nope", &Map::new()).unwrap_err();
        assert!(matches!(err, BackendError::UnknownTool { name } if name == "nope"));
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_name() {
        let mut registry = ToolRegistry::new();
        let handler = Arc::new(EchoHandler::default());
        registry.register(descriptor("read_file"), handler.clone());
        registry.register(descriptor("list_directory"), handler.clone());

        let ctx = ExecutionContext::default();
        let out = registry
            .dispatch("list_directory", &params(json!({"path": "src"})), &ctx)
            .await
            .unwrap();
        assert_eq!(out["path"], "src");
        assert_eq!(*handler.calls.lock().unwrap(), vec!["list_directory"]);
    }

    #[tokio::test]
    async fn test_dispatch_rejects_before_calling_handler() {
        let mut registry = ToolRegistry::new();
        let handler = Arc::new(EchoHandler::default());
        registry.register(descriptor("read_file"), handler.clone());

        let ctx = ExecutionContext::default();
        assert!(registry.dispatch("read_file", &Map::new(), &ctx).await.is_err());
        assert!(registry.dispatch("unknown", &Map::new(), &ctx).await.is_err());
        assert!(handler.calls.lock().unwrap().is_empty());
    }
}
