//! Orchestrator configuration.
//!
//! Loaded from `orchestrator.yaml`. Every field has a default, so an empty
//! file (or no file at all) yields a working configuration. String values may
//! reference environment variables as `${VAR}` or `${VAR:-default}`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::agent_core::errors::AgentError;
use crate::agent_core::executor::DEFAULT_MAX_TOOL_RESULT_CHARS;
use crate::agent_core::loop_guard::{DEFAULT_MAX_REPEATS, DEFAULT_WINDOW};

/// Config file name searched for when no explicit path is given.
pub const CONFIG_FILE_NAME: &str = "orchestrator.yaml";

/// Env var pointing at an explicit config file.
pub const CONFIG_ENV_VAR: &str = "SANDBOX_ORCHESTRATOR_CONFIG";

// ─── Sections ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewaySettings {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Ask the gateway for an SSE response.
    pub streaming: bool,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:4000".to_string(),
            timeout_secs: 180,
            streaming: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub base_url: String,
    pub sandbox_id: String,
    /// Working directory inside the sandbox for commands.
    pub working_dir: Option<String>,
    pub timeout_secs: u64,
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            sandbox_id: "default".to_string(),
            working_dir: None,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopGuardSettings {
    /// Allowed invocations per fingerprint inside one window.
    pub max_repeats: u32,
    pub window_secs: u64,
}

impl Default for LoopGuardSettings {
    fn default() -> Self {
        Self {
            max_repeats: DEFAULT_MAX_REPEATS,
            window_secs: DEFAULT_WINDOW.as_secs(),
        }
    }
}

impl LoopGuardSettings {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApprovalSettings {
    /// Execute tool calls without asking.
    pub auto_approve: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// SQLite file for session history. Defaults to `<data_dir>/sessions.db`.
    pub database_path: Option<String>,
}

impl SessionSettings {
    pub fn resolved_path(&self, data_dir: &Path) -> PathBuf {
        match &self.database_path {
            Some(p) => PathBuf::from(expand_tilde(p)),
            None => data_dir.join("sessions.db"),
        }
    }
}

// ─── OrchestratorConfig ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub gateway: GatewaySettings,
    pub backend: BackendSettings,
    pub loop_guard: LoopGuardSettings,
    pub approval: ApprovalSettings,
    pub session: SessionSettings,
    /// Cap on the rendered size of one tool result.
    pub max_tool_result_chars: usize,
    /// Sent when the cleaned history would otherwise be empty.
    pub placeholder_message: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            gateway: GatewaySettings::default(),
            backend: BackendSettings::default(),
            loop_guard: LoopGuardSettings::default(),
            approval: ApprovalSettings::default(),
            session: SessionSettings::default(),
            max_tool_result_chars: DEFAULT_MAX_TOOL_RESULT_CHARS,
            placeholder_message: "Continue.".to_string(),
        }
    }
}

impl OrchestratorConfig {
    /// Parse YAML after env-var interpolation, then validate.
    pub fn from_yaml_str(raw: &str) -> Result<Self, AgentError> {
        let interpolated = interpolate_env_vars(raw);
        if interpolated.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self =
            serde_yaml::from_str(&interpolated).map_err(|e| AgentError::ConfigError {
                reason: format!("failed to parse config: {e}"),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the orchestrator cannot run with.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.loop_guard.max_repeats == 0 {
            return Err(AgentError::ConfigError {
                reason: "loop_guard.max_repeats must be at least 1".into(),
            });
        }
        if self.loop_guard.window_secs == 0 {
            return Err(AgentError::ConfigError {
                reason: "loop_guard.window_secs must be positive".into(),
            });
        }
        if self.max_tool_result_chars == 0 {
            return Err(AgentError::ConfigError {
                reason: "max_tool_result_chars must be positive".into(),
            });
        }
        if self.placeholder_message.trim().is_empty() {
            return Err(AgentError::ConfigError {
                reason: "placeholder_message must not be empty".into(),
            });
        }
        Ok(())
    }
}

// ─── Loading ────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `SANDBOX_ORCHESTRATOR_CONFIG` first, then searches upward from
/// `start` for `orchestrator.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, AgentError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV_VAR) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
        tracing::warn!(path = %candidate.display(), "config path from env does not exist");
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(AgentError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load and parse a config file.
pub fn load_config(path: &Path) -> Result<OrchestratorConfig, AgentError> {
    let raw = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;
    OrchestratorConfig::from_yaml_str(&raw)
}

/// Find and load the config, falling back to defaults when none exists.
pub fn load_or_default(start: &Path) -> Result<OrchestratorConfig, AgentError> {
    match find_config_path(start) {
        Ok(path) => {
            tracing::info!(path = %path.display(), "loading orchestrator config");
            load_config(&path)
        }
        Err(_) => {
            tracing::info!("no orchestrator config found, using defaults");
            Ok(OrchestratorConfig::default())
        }
    }
}

// ─── Env-var interpolation ──────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_expr = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_expr.push(c);
            }
            result.push_str(&resolve_var_expr(&var_expr));
        } else {
            result.push(ch);
        }
    }

    result
}

/// Resolve `VAR` or `VAR:-default`.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((var_name, default)) => {
            std::env::var(var_name).unwrap_or_else(|_| expand_tilde(default))
        }
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_yields_defaults() {
        let config = OrchestratorConfig::from_yaml_str("").unwrap();
        assert_eq!(config.loop_guard.max_repeats, 3);
        assert_eq!(config.loop_guard.window(), Duration::from_secs(30));
        assert!(!config.approval.auto_approve);
        assert_eq!(config.max_tool_result_chars, 6_000);
        assert_eq!(config.placeholder_message, "Continue.");
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let yaml = r#"
            backend:
              sandbox_id: sbx-42
            approval:
              auto_approve: true
        "#;
        let config = OrchestratorConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.backend.sandbox_id, "sbx-42");
        assert_eq!(config.backend.timeout_secs, 120);
        assert!(config.approval.auto_approve);
        assert_eq!(config.gateway.base_url, "http://localhost:4000");
    }

    #[test]
    fn test_env_interpolation_in_yaml() {
        std::env::set_var("__TEST_ORCH_GATEWAY_URL__", "http://gw.internal:9000");
        let yaml = "gateway:\n  base_url: ${__TEST_ORCH_GATEWAY_URL__:-http://fallback}\n";
        let config = OrchestratorConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.gateway.base_url, "http://gw.internal:9000");
        std::env::remove_var("__TEST_ORCH_GATEWAY_URL__");
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__TEST_ORCH_NONEXISTENT__");
        assert_eq!(
            interpolate_env_vars("${__TEST_ORCH_NONEXISTENT__:-/fallback/path}"),
            "/fallback/path"
        );
    }

    #[test]
    fn test_interpolate_no_vars() {
        let input = "plain text with no variables";
        assert_eq!(interpolate_env_vars(input), input);
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/sessions.db");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/sessions.db"));
    }

    #[test]
    fn test_validation_rejects_zero_repeats() {
        let err = OrchestratorConfig::from_yaml_str("loop_guard:\n  max_repeats: 0\n").unwrap_err();
        assert!(matches!(err, AgentError::ConfigError { .. }));
    }

    #[test]
    fn test_malformed_yaml() {
        let err = OrchestratorConfig::from_yaml_str("gateway: [unclosed").unwrap_err();
        assert!(matches!(err, AgentError::ConfigError { .. }));
    }

    #[test]
    fn test_find_and_load_from_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "max_tool_result_chars: 100\n",
        )
        .unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let path = find_config_path(&nested).unwrap();
        assert_eq!(path, dir.path().join(CONFIG_FILE_NAME));
        assert_eq!(load_config(&path).unwrap().max_tool_result_chars, 100);
    }

    #[test]
    fn test_session_path_default() {
        let settings = SessionSettings::default();
        assert_eq!(
            settings.resolved_path(Path::new("/data")),
            PathBuf::from("/data/sessions.db")
        );
    }
}
