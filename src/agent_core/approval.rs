//! Approval queue for tool invocations.
//!
//! Holds at most one invocation awaiting an explicit human decision
//! (`current`) and a FIFO `backlog` behind it. The queue never executes
//! anything itself: every operation returns the invocations the caller must
//! execute or record as denied.

use std::collections::VecDeque;

use super::types::{InvocationStatus, ToolInvocation};

/// Maximum length of the argument excerpt in a generic preview.
const PREVIEW_ARGS_MAX_BYTES: usize = 100;

// ─── Queue ──────────────────────────────────────────────────────────────────

/// Outcome of [`ApprovalQueue::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub enum EnqueueOutcome {
    /// Auto-approve is on: the invocation (now `Approved`) bypasses the queue.
    ExecuteNow(ToolInvocation),
    /// The invocation became `current` and awaits a decision.
    Current,
    /// The invocation was appended to the backlog at this position (0-based).
    Backlogged(usize),
}

/// Single-slot-plus-backlog approval queue.
#[derive(Debug, Clone)]
pub struct ApprovalQueue {
    current: Option<ToolInvocation>,
    backlog: VecDeque<ToolInvocation>,
    auto_approve: bool,
    /// Whether the approval details panel is expanded for `current`.
    details_expanded: bool,
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new(false)
    }
}

impl ApprovalQueue {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            current: None,
            backlog: VecDeque::new(),
            auto_approve,
            details_expanded: true,
        }
    }

    pub fn auto_approve(&self) -> bool {
        self.auto_approve
    }

    /// Toggle auto-approve. Invocations already queued stay queued.
    pub fn set_auto_approve(&mut self, enabled: bool) {
        self.auto_approve = enabled;
    }

    /// The invocation awaiting a decision, if any.
    pub fn current(&self) -> Option<&ToolInvocation> {
        self.current.as_ref()
    }

    pub fn backlog(&self) -> impl Iterator<Item = &ToolInvocation> {
        self.backlog.iter()
    }

    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// True when neither `current` nor the backlog holds anything.
    pub fn is_empty(&self) -> bool {
        self.current.is_none() && self.backlog.is_empty()
    }

    /// Total number of invocations waiting (current + backlog).
    pub fn len(&self) -> usize {
        usize::from(self.current.is_some()) + self.backlog.len()
    }

    pub fn details_expanded(&self) -> bool {
        self.details_expanded
    }

    pub fn toggle_details(&mut self) {
        self.details_expanded = !self.details_expanded;
    }

    /// Add an invocation.
    pub fn enqueue(&mut self, mut invocation: ToolInvocation) -> EnqueueOutcome {
        if self.auto_approve {
            invocation.status = InvocationStatus::Approved;
            return EnqueueOutcome::ExecuteNow(invocation);
        }

        invocation.status = InvocationStatus::Pending;
        if self.current.is_none() && self.backlog.is_empty() {
            self.set_current(Some(invocation));
            EnqueueOutcome::Current
        } else {
            self.backlog.push_back(invocation);
            EnqueueOutcome::Backlogged(self.backlog.len() - 1)
        }
    }

    /// Approve and clear `current`.
    ///
    /// Returns the approved invocation for the caller to execute. The slot
    /// stays empty until [`promote_next`](Self::promote_next), so the next
    /// entry is only offered once this one has run.
    pub fn approve_current(&mut self) -> Option<ToolInvocation> {
        let mut invocation = self.current.take()?;
        invocation.status = InvocationStatus::Approved;
        Some(invocation)
    }

    /// Deny and clear `current`. Follow with [`promote_next`](Self::promote_next).
    pub fn deny_current(&mut self) -> Option<ToolInvocation> {
        let mut invocation = self.current.take()?;
        invocation.status = InvocationStatus::Denied;
        Some(invocation)
    }

    /// Move the head of the backlog into an empty `current` slot.
    ///
    /// Returns the new current, or `None` if the slot was occupied or the
    /// backlog is empty.
    pub fn promote_next(&mut self) -> Option<&ToolInvocation> {
        if self.current.is_some() {
            return None;
        }
        let next = self.backlog.pop_front()?;
        self.set_current(Some(next));
        self.current.as_ref()
    }

    /// Drain `[current, ...backlog]` as approved, in queue order.
    pub fn approve_all(&mut self) -> Vec<ToolInvocation> {
        self.drain_with(InvocationStatus::Approved)
    }

    /// Drain `[current, ...backlog]` as denied, in queue order.
    pub fn deny_all(&mut self) -> Vec<ToolInvocation> {
        self.drain_with(InvocationStatus::Denied)
    }

    fn drain_with(&mut self, status: InvocationStatus) -> Vec<ToolInvocation> {
        let mut batch: Vec<ToolInvocation> = self.current.take().into_iter().collect();
        batch.extend(self.backlog.drain(..));
        for invocation in &mut batch {
            invocation.status = status;
        }
        self.set_current(None);
        batch
    }

    fn set_current(&mut self, invocation: Option<ToolInvocation>) {
        self.current = invocation;
        self.details_expanded = true;
    }
}

// ─── Preview ────────────────────────────────────────────────────────────────

/// Truncate a string to at most `max_bytes`, respecting UTF-8 char boundaries.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Generate a human-readable preview of what a tool invocation will do.
pub fn generate_preview(
    tool_name: &str,
    params: &serde_json::Map<String, serde_json::Value>,
) -> String {
    let arg = |key: &str| {
        params
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or("<unknown>")
            .to_string()
    };

    match tool_name {
        "read_file" => format!("Read file: {}", arg("path")),
        "write_file" => format!("Write to file: {}", arg("path")),
        "list_directory" => format!("List directory: {}", arg("path")),
        "search_files" => format!("Search for '{}' in {}", arg("pattern"), arg("path")),
        "execute_command" => format!("Run command: {}", arg("command")),
        "start_session" => format!("Start session: {}", arg("command")),
        "send_input" => format!("Send input to session {}", arg("session_id")),
        "session_status" => format!("Check session {}", arg("session_id")),
        "kill_session" => format!("Kill session {}", arg("session_id")),
        "get_preview_url" => match params.get("port").and_then(|v| v.as_u64()) {
            Some(port) => format!("Get preview URL for port {port}"),
            None => "Get preview URL".to_string(),
        },
        _ => {
            let args_preview = serde_json::to_string(params).unwrap_or_default();
            let truncated = if args_preview.len() > PREVIEW_ARGS_MAX_BYTES {
                format!("{}...", truncate_utf8(&args_preview, PREVIEW_ARGS_MAX_BYTES))
            } else {
                args_preview
            };
            format!("Execute {tool_name}: {truncated}")
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
