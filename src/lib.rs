//! Conversation orchestrator for a sandboxed AI coding assistant.
//!
//! A user message goes to an LLM gateway; tool calls in the reply pass
//! through an approval queue and a loop guard before a sandbox backend runs
//! them, and tool results automatically trigger the next assistant turn.

pub mod agent_core;
pub mod backend;
pub mod config;
pub mod gateway;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;

use agent_core::{ConversationOrchestrator, SessionStore, SqliteSessionStore};
use backend::{register_builtin_tools, HttpBackend, ToolRegistry};
use config::OrchestratorConfig;
use gateway::HttpGateway;

/// Return the platform-standard data directory.
///
/// - macOS: `~/Library/Application Support/sandbox-orchestrator/`
/// - Linux: `$XDG_DATA_HOME/sandbox-orchestrator/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.sandbox-orchestrator/` if neither can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("sandbox-orchestrator");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".sandbox-orchestrator")
}

/// Build a ready orchestrator from config.
///
/// Wires the HTTP gateway, the HTTP sandbox backend with the built-in tools,
/// and the SQLite session store under `data_dir`.
pub fn build_orchestrator(
    config: &OrchestratorConfig,
    data_dir: &Path,
) -> anyhow::Result<ConversationOrchestrator> {
    let gateway = HttpGateway::new(
        config.gateway.base_url.clone(),
        Duration::from_secs(config.gateway.timeout_secs),
    )?;
    let backend = HttpBackend::new(
        config.backend.base_url.clone(),
        Duration::from_secs(config.backend.timeout_secs),
    )?;

    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry, Arc::new(backend));

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create {}", data_dir.display()))?;
    let db_path = config.session.resolved_path(data_dir);
    let store: Arc<dyn SessionStore> =
        Arc::new(SqliteSessionStore::open(&db_path.to_string_lossy())?);

    tracing::info!(
        gateway = %config.gateway.base_url,
        backend = %config.backend.base_url,
        tools = registry.len(),
        db = %db_path.display(),
        "orchestrator ready"
    );

    Ok(
        ConversationOrchestrator::new(Arc::new(gateway), Arc::new(registry), config)
            .with_store(store),
    )
}

/// Initialize the tracing subscriber, writing to `orchestrator.log` in `log_dir`.
///
/// 1. Rotates existing logs (orchestrator.log → .1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh log with a line-flushing writer.
/// 3. Logs a startup banner with the log path.
///
/// Returns the path of the new log file.
pub fn init_tracing(log_dir: &Path) -> anyhow::Result<PathBuf> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create {}", log_dir.display()))?;
    let log_path = log_dir.join("orchestrator.log");

    rotate_log_file(&log_path, 3);

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("sandbox_orchestrator=info,warn"));

    fmt::fmt()
        .with_env_filter(filter)
        .with_writer(FlushingWriter::new(log_file))
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install tracing subscriber: {e}"))?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== sandbox-orchestrator starting ==="
    );

    Ok(log_path)
}

/// Rotate log files: `orchestrator.log` → `.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// Keeps each log line on disk even if the process dies mid-turn.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_log_file_shifts_chain() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("orchestrator.log");
        std::fs::write(&base, "current").unwrap();
        std::fs::write(dir.path().join("orchestrator.log.1"), "older").unwrap();

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        let one = std::fs::read_to_string(dir.path().join("orchestrator.log.1")).unwrap();
        let two = std::fs::read_to_string(dir.path().join("orchestrator.log.2")).unwrap();
        assert_eq!(one, "current");
        assert_eq!(two, "older");
    }

    #[test]
    fn test_rotate_log_file_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("orchestrator.log");
        for (name, body) in [
            ("orchestrator.log", "0"),
            ("orchestrator.log.1", "1"),
            ("orchestrator.log.2", "2"),
            ("orchestrator.log.3", "3"),
        ] {
            std::fs::write(dir.path().join(name), body).unwrap();
        }

        rotate_log_file(&base, 3);

        let three = std::fs::read_to_string(dir.path().join("orchestrator.log.3")).unwrap();
        assert_eq!(three, "2");
        assert!(!dir.path().join("orchestrator.log.4").exists());
    }

    #[test]
    fn test_flushing_writer_writes_through() {
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.log");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = FlushingWriter::new(file);
        writer.write_all(b"line\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\n");
    }

    #[test]
    fn test_build_orchestrator_from_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator =
            build_orchestrator(&OrchestratorConfig::default(), dir.path()).unwrap();
        assert!(orchestrator.history().is_empty());
        assert!(dir.path().join("sessions.db").exists());
    }

    #[test]
    fn test_data_dir_is_named() {
        let dir = data_dir();
        assert!(dir.to_string_lossy().contains("sandbox-orchestrator"));
    }
}
