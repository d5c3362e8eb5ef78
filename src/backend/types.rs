//! Shared types for the execution backend.

use serde::{Deserialize, Serialize};

// ─── Tool Descriptors ───────────────────────────────────────────────────────

/// Tool definition advertised to the LLM gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    /// JSON Schema for the parameters object.
    #[serde(default, alias = "inputSchema")]
    pub params_schema: serde_json::Value,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        params_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params_schema,
        }
    }

    /// Names listed in the schema's `required` array.
    pub fn required_params(&self) -> Vec<&str> {
        self.params_schema
            .get("required")
            .and_then(|r| r.as_array())
            .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default()
    }
}

// ─── Execution Context ──────────────────────────────────────────────────────

/// Where a tool runs. Passed to every handler alongside the params.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Sandbox the backend should act in.
    pub sandbox_id: String,
    pub conversation_id: String,
    /// Working directory inside the sandbox, if not the sandbox default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
}

// ─── Wire Types ─────────────────────────────────────────────────────────────

/// Response envelope returned by every backend operation.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}
