//! Tool executor.
//!
//! Runs approved invocations through the registry's dispatch table while
//! maintaining:
//! - the loop guard (refuses repeated identical calls)
//! - the pending-execution set (ids dispatched but not yet resolved)
//! - result rendering and truncation
//!
//! Every outcome is returned as data: an updated invocation plus the message
//! to append. Nothing here returns an error to the caller.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;

use super::approval::truncate_utf8;
use super::loop_guard::{GuardVerdict, LoopGuard};
use super::types::{InvocationStatus, Message, NoticeKind, ToolInvocation};
use crate::backend::{BackendError, ExecutionContext, ToolRegistry};

/// Default cap on the rendered size of one tool result.
///
/// Keeps a single large file read from consuming the model's context window.
pub const DEFAULT_MAX_TOOL_RESULT_CHARS: usize = 6_000;

// ─── Reports ────────────────────────────────────────────────────────────────

/// Outcome of one invocation: its final status and the message to append.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionReport {
    pub invocation: ToolInvocation,
    pub message: Message,
}

/// Result of admitting an invocation for execution.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Passed the loop guard; now `Executing` and in the pending set.
    Dispatch(ToolInvocation),
    /// Refused by the loop guard; the backend is never contacted.
    Refused(ExecutionReport),
}

// ─── ToolExecutor ───────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    loop_guard: LoopGuard,
    pending: HashSet<String>,
    context: ExecutionContext,
    max_result_chars: usize,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        loop_guard: LoopGuard,
        context: ExecutionContext,
        max_result_chars: usize,
    ) -> Self {
        Self {
            registry,
            loop_guard,
            pending: HashSet::new(),
            context,
            max_result_chars,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    pub fn loop_guard(&self) -> &LoopGuard {
        &self.loop_guard
    }

    /// Number of invocations dispatched but not yet resolved.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, invocation_id: &str) -> bool {
        self.pending.contains(invocation_id)
    }

    /// Run one invocation to completion.
    pub async fn execute(&mut self, invocation: ToolInvocation) -> ExecutionReport {
        let invocation = match self.admit(invocation) {
            Admission::Dispatch(inv) => inv,
            Admission::Refused(report) => return report,
        };

        let result = self.dispatch(&invocation).await;
        self.settle(invocation, result)
    }

    /// Send an admitted invocation to the backend. Does not touch any state.
    pub async fn dispatch(&self, invocation: &ToolInvocation) -> Result<Value, BackendError> {
        self.registry
            .dispatch(&invocation.name, &invocation.params, &self.context)
            .await
    }

    /// Run a batch. Admitted invocations are dispatched concurrently; reports
    /// come back in input order once all of them have resolved.
    pub async fn execute_batch(&mut self, invocations: Vec<ToolInvocation>) -> Vec<ExecutionReport> {
        let mut reports: Vec<Option<ExecutionReport>> = Vec::with_capacity(invocations.len());
        let mut admitted: Vec<(usize, ToolInvocation)> = Vec::new();

        for (i, invocation) in invocations.into_iter().enumerate() {
            match self.admit(invocation) {
                Admission::Dispatch(inv) => {
                    admitted.push((i, inv));
                    reports.push(None);
                }
                Admission::Refused(report) => reports.push(Some(report)),
            }
        }

        tracing::info!(
            dispatched = admitted.len(),
            refused = reports.iter().filter(|r| r.is_some()).count(),
            "executing tool batch"
        );

        let results =
            futures::future::join_all(admitted.iter().map(|(_, inv)| self.dispatch(inv))).await;

        for ((i, invocation), result) in admitted.into_iter().zip(results) {
            reports[i] = Some(self.settle(invocation, result));
        }

        reports.into_iter().flatten().collect()
    }

    /// Loop check, then mark `Executing` and add to the pending set.
    pub fn admit(&mut self, mut invocation: ToolInvocation) -> Admission {
        if let GuardVerdict::Refused { count } =
            self.loop_guard.check(&invocation.name, &invocation.params)
        {
            invocation.status = InvocationStatus::Error;
            let message = Message::notice(
                NoticeKind::LoopDetected,
                format!(
                    "Loop detected: `{}` was already called {count} times with the same \
                     arguments in the last {}s. Skipping execution.",
                    invocation.name,
                    self.loop_guard.window().as_secs()
                ),
            );
            return Admission::Refused(ExecutionReport {
                invocation,
                message,
            });
        }

        self.pending.insert(invocation.id.clone());
        invocation.status = InvocationStatus::Executing;
        tracing::info!(
            tool = %invocation.name,
            invocation_id = %invocation.id,
            "dispatching tool"
        );
        Admission::Dispatch(invocation)
    }

    /// Record the backend outcome and release the pending slot.
    pub fn settle(
        &mut self,
        mut invocation: ToolInvocation,
        result: Result<Value, BackendError>,
    ) -> ExecutionReport {
        let message = match result {
            Ok(value) => {
                invocation.status = InvocationStatus::Completed;
                let content = truncate_tool_result(
                    &render_tool_result(&value),
                    &invocation.name,
                    self.max_result_chars,
                );
                tracing::info!(
                    tool = %invocation.name,
                    invocation_id = %invocation.id,
                    result_len = content.len(),
                    "tool completed"
                );
                Message::tool_result(invocation.id.clone(), content)
            }
            Err(e) => {
                invocation.status = InvocationStatus::Error;
                tracing::warn!(
                    tool = %invocation.name,
                    invocation_id = %invocation.id,
                    error = %e,
                    "tool failed"
                );
                Message::notice(
                    NoticeKind::Error,
                    format!("Error: `{}` failed: {e}", invocation.name),
                )
            }
        };

        self.pending.remove(&invocation.id);
        ExecutionReport {
            invocation,
            message,
        }
    }
}

// ─── Result Rendering ───────────────────────────────────────────────────────

/// Render a backend payload as tool-result text.
///
/// Strings are used verbatim; anything else is pretty-printed JSON.
pub fn render_tool_result(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "(no output)".to_string(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Cap a tool result at `max_chars` bytes, keeping the beginning.
pub fn truncate_tool_result(result: &str, tool_name: &str, max_chars: usize) -> String {
    if result.len() <= max_chars {
        return result.to_string();
    }

    let truncated = truncate_utf8(result, max_chars);
    tracing::warn!(
        tool = %tool_name,
        original_len = result.len(),
        truncated_to = truncated.len(),
        "tool result truncated"
    );
    format!(
        "{truncated}\n\n[... truncated: showing first {} of {} chars]",
        truncated.len(),
        result.len()
    )
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::loop_guard::{ManualClock, DEFAULT_MAX_REPEATS, DEFAULT_WINDOW};
    use crate::agent_core::types::{ContentBlock, Role};
    use crate::backend::{ToolDescriptor, ToolHandler};
    use async_trait::async_trait;
    use serde_json::{json, Map};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Records calls; fails for any `path` equal to `"missing"`.
    #[derive(Default)]
    struct RecordingHandler {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ToolHandler for RecordingHandler {
        async fn call(
            &self,
            tool: &str,
            params: &Map<String, Value>,
            _ctx: &ExecutionContext,
        ) -> Result<Value, BackendError> {
            self.calls.lock().unwrap().push(tool.to_string());
            match params.get("path").and_then(Value::as_str) {
                Some("missing") => Err(BackendError::ToolFailed {
                    tool: tool.to_string(),
                    message: "no such file".to_string(),
                }),
                Some("big") => Ok(Value::String("x".repeat(10_000))),
                Some(path) => Ok(Value::String(format!("contents of {path}"))),
                None => Ok(json!({"entries": ["a", "b"]})),
            }
        }
    }

    fn setup() -> (ToolExecutor, Arc<RecordingHandler>, Arc<ManualClock>) {
        let handler = Arc::new(RecordingHandler::default());
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolDescriptor::new("read_file", "read", json!({"required": ["path"]})),
            handler.clone(),
        );
        registry.register(
            ToolDescriptor::new("list_directory", "list", json!({})),
            handler.clone(),
        );
        let clock = Arc::new(ManualClock::new());
        let executor = ToolExecutor::new(
            Arc::new(registry),
            LoopGuard::new(DEFAULT_MAX_REPEATS, DEFAULT_WINDOW, clock.clone()),
            ExecutionContext::default(),
            DEFAULT_MAX_TOOL_RESULT_CHARS,
        );
        (executor, handler, clock)
    }

    fn invocation(id: &str, name: &str, params: Value) -> ToolInvocation {
        ToolInvocation {
            id: id.to_string(),
            name: name.to_string(),
            params: params.as_object().cloned().unwrap_or_default(),
            status: InvocationStatus::Approved,
        }
    }

    #[tokio::test]
    async fn test_success_appends_user_tool_result() {
        let (mut executor, handler, _) = setup();
        let report = executor
            .execute(invocation("c1", "read_file", json!({"path": "a.txt"})))
            .await;

        assert_eq!(report.invocation.status, InvocationStatus::Completed);
        assert_eq!(report.message.role, Role::User);
        match report.message.content.blocks() {
            [ContentBlock::ToolResult(result)] => {
                assert_eq!(result.tool_call_id, "c1");
                assert_eq!(result.content, "contents of a.txt");
            }
            other => panic!("unexpected blocks: {other:?}"),
        }
        assert_eq!(handler.calls.lock().unwrap().len(), 1);
        assert_eq!(executor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_error_notice() {
        let (mut executor, _, _) = setup();
        let report = executor
            .execute(invocation("c1", "read_file", json!({"path": "missing"})))
            .await;

        assert_eq!(report.invocation.status, InvocationStatus::Error);
        assert_eq!(report.message.role, Role::Assistant);
        assert!(report.message.is_error_notice());
        assert!(extract(&report.message).contains("no such file"));
        assert_eq!(executor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_data_not_panic() {
        let (mut executor, handler, _) = setup();
        let report = executor
            .execute(invocation("c1", "fly_to_moon", json!({})))
            .await;
        assert_eq!(report.invocation.status, InvocationStatus::Error);
        assert!(extract(&report.message).contains("unknown tool"));
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_required_arg_is_error() {
        let (mut executor, handler, _) = setup();
        let report = executor.execute(invocation("c1", "read_file", json!({}))).await;
        assert_eq!(report.invocation.status, InvocationStatus::Error);
        assert!(extract(&report.message).contains("missing required field"));
        assert!(handler.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_loop_guard_refuses_fourth_then_recovers() {
        let (mut executor, handler, clock) = setup();
        let params = json!({"path": "a.txt"});

        for i in 0..3 {
            let report = executor
                .execute(invocation(&format!("c{i}"), "read_file", params.clone()))
                .await;
            assert_eq!(report.invocation.status, InvocationStatus::Completed);
            clock.advance(Duration::from_secs(2));
        }

        let refused = executor
            .execute(invocation("c3", "read_file", params.clone()))
            .await;
        assert_eq!(refused.invocation.status, InvocationStatus::Error);
        assert_eq!(refused.message.notice, Some(NoticeKind::LoopDetected));
        assert_eq!(handler.calls.lock().unwrap().len(), 3);
        assert_eq!(executor.pending_count(), 0);

        clock.advance(Duration::from_secs(31));
        let report = executor.execute(invocation("c4", "read_file", params)).await;
        assert_eq!(report.invocation.status, InvocationStatus::Completed);
        assert_eq!(handler.calls.lock().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_pending_set_tracks_admitted_until_settled() {
        let (mut executor, _, _) = setup();
        let Admission::Dispatch(inv) =
            executor.admit(invocation("c1", "read_file", json!({"path": "a"})))
        else {
            panic!("expected dispatch");
        };
        assert_eq!(inv.status, InvocationStatus::Executing);
        assert!(executor.is_pending("c1"));

        executor.settle(inv, Ok(json!("done")));
        assert!(!executor.is_pending("c1"));
    }

    #[tokio::test]
    async fn test_batch_runs_all_and_preserves_order() {
        let (mut executor, handler, _) = setup();
        let reports = executor
            .execute_batch(vec![
                invocation("a", "read_file", json!({"path": "1"})),
                invocation("b", "list_directory", json!({})),
                invocation("c", "read_file", json!({"path": "missing"})),
            ])
            .await;

        let ids: Vec<&str> = reports.iter().map(|r| r.invocation.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(reports[0].invocation.status, InvocationStatus::Completed);
        assert!(extract_result(&reports[1].message).contains("entries"));
        assert_eq!(reports[2].invocation.status, InvocationStatus::Error);
        assert_eq!(handler.calls.lock().unwrap().len(), 3);
        assert_eq!(executor.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_large_result_truncated() {
        let (mut executor, _, _) = setup();
        let report = executor
            .execute(invocation("c1", "read_file", json!({"path": "big"})))
            .await;
        let content = extract_result(&report.message);
        assert!(content.starts_with(&"x".repeat(100)));
        assert!(content.contains("[... truncated: showing first 6000 of 10000 chars]"));
    }

    #[test]
    fn test_render_tool_result_variants() {
        assert_eq!(render_tool_result(&json!("plain")), "plain");
        assert_eq!(render_tool_result(&Value::Null), "(no output)");
        assert!(render_tool_result(&json!({"a": 1})).contains("\"a\": 1"));
    }

    #[test]
    fn test_truncate_tool_result_short_untouched() {
        assert_eq!(truncate_tool_result("short", "read_file", 100), "short");
    }

    fn extract(message: &Message) -> String {
        crate::agent_core::types::extract_text(&message.content)
    }

    fn extract_result(message: &Message) -> String {
        match message.content.blocks() {
            [ContentBlock::ToolResult(result)] => result.content.clone(),
            other => panic!("unexpected blocks: {other:?}"),
        }
    }
}
