//! Conversation orchestrator.
//!
//! Owns the message history and composes the other agent-core pieces:
//! 1. **Turn**: user text is appended and the cleaned history goes to the
//!    LLM gateway
//! 2. **Approve**: a tool call in the response is enqueued for approval (or
//!    executed directly in auto-approve mode)
//! 3. **Execute**: approved invocations run through the executor; results
//!    and failures are appended to the history
//! 4. **Continue**: after every mutation the continuation scheduler decides
//!    whether to call the gateway again
//!
//! All operations take `&mut self`, so a conversation has exactly one logical
//! thread of control. Failures end up in the transcript, never as errors.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedSender;

use super::adjacency::{clean_for_gateway, is_adjacency_valid, repair_history};
use super::approval::{generate_preview, ApprovalQueue, EnqueueOutcome};
use super::continuation::{ContinuationDecision, ContinuationScheduler, ConversationState};
use super::database::SessionStore;
use super::errors::AgentError;
use super::executor::{Admission, ExecutionReport, ToolExecutor};
use super::loop_guard::{Clock, LoopGuard, SystemClock};
use super::types::{extract_tool_calls, InvocationStatus, Message, NoticeKind, ToolInvocation};
use crate::backend::{ExecutionContext, ToolRegistry};
use crate::config::OrchestratorConfig;
use crate::gateway::types::generate_call_id;
use crate::gateway::{GatewayMessage, GatewayRequest, LlmGateway};

// ─── Events ─────────────────────────────────────────────────────────────────

/// Notifications for a surrounding UI.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    MessageAppended(Message),
    /// A message's tool status changed in place.
    MessageUpdated(Message),
    /// A new invocation became the current approval.
    ApprovalRequested {
        invocation: ToolInvocation,
        preview: String,
    },
    StateChanged(ConversationState),
}

// ─── ConversationOrchestrator ───────────────────────────────────────────────

pub struct ConversationOrchestrator {
    conversation_id: String,
    history: Vec<Message>,
    queue: ApprovalQueue,
    executor: ToolExecutor,
    scheduler: ContinuationScheduler,
    gateway: Arc<dyn LlmGateway>,
    store: Option<Arc<dyn SessionStore>>,
    events: Option<UnboundedSender<OrchestratorEvent>>,
    placeholder: String,
    streaming: bool,
    last_state: ConversationState,
}

impl ConversationOrchestrator {
    /// Start a new, empty conversation.
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        registry: Arc<ToolRegistry>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self::with_clock(gateway, registry, config, Arc::new(SystemClock))
    }

    /// Start a new conversation with an explicit loop-guard clock.
    pub fn with_clock(
        gateway: Arc<dyn LlmGateway>,
        registry: Arc<ToolRegistry>,
        config: &OrchestratorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let conversation_id = uuid::Uuid::new_v4().to_string();
        Self::build(conversation_id, Vec::new(), gateway, registry, config, clock)
    }

    /// Reopen a stored session.
    ///
    /// The loaded history is repaired before use and never auto-continues:
    /// a trailing tool result counts as already consumed.
    pub fn resume(
        gateway: Arc<dyn LlmGateway>,
        registry: Arc<ToolRegistry>,
        config: &OrchestratorConfig,
        store: Arc<dyn SessionStore>,
        session_id: &str,
    ) -> Result<Self, AgentError> {
        let loaded = store.load_messages(session_id)?;
        let loaded_len = loaded.len();
        let history = repair_history(&loaded);

        tracing::info!(
            session_id = %session_id,
            loaded = loaded_len,
            kept = history.len(),
            "resumed conversation"
        );

        let mut orchestrator = Self::build(
            session_id.to_string(),
            history,
            gateway,
            registry,
            config,
            Arc::new(SystemClock),
        );
        orchestrator.scheduler.mark_consumed(&orchestrator.history);
        orchestrator.store = Some(store);
        Ok(orchestrator)
    }

    fn build(
        conversation_id: String,
        history: Vec<Message>,
        gateway: Arc<dyn LlmGateway>,
        registry: Arc<ToolRegistry>,
        config: &OrchestratorConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let context = ExecutionContext {
            sandbox_id: config.backend.sandbox_id.clone(),
            conversation_id: conversation_id.clone(),
            working_dir: config.backend.working_dir.clone(),
        };
        let loop_guard = LoopGuard::new(
            config.loop_guard.max_repeats,
            config.loop_guard.window(),
            clock,
        );

        Self {
            conversation_id,
            history,
            queue: ApprovalQueue::new(config.approval.auto_approve),
            executor: ToolExecutor::new(registry, loop_guard, context, config.max_tool_result_chars),
            scheduler: ContinuationScheduler::new(),
            gateway,
            store: None,
            events: None,
            placeholder: config.placeholder_message.clone(),
            streaming: config.gateway.streaming,
            last_state: ConversationState::Idle,
        }
    }

    /// Persist appended messages to `store` (best-effort).
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Send events to `tx`. A closed receiver is ignored.
    pub fn with_events(mut self, tx: UnboundedSender<OrchestratorEvent>) -> Self {
        self.events = Some(tx);
        self
    }

    // ─── Accessors ──────────────────────────────────────────────────────

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn state(&self) -> ConversationState {
        self.scheduler.state()
    }

    pub fn queue(&self) -> &ApprovalQueue {
        &self.queue
    }

    pub fn pending_executions(&self) -> usize {
        self.executor.pending_count()
    }

    // ─── User Actions ───────────────────────────────────────────────────

    /// Append a user message and run the resulting turn(s).
    pub async fn send_user_message(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.trim().is_empty() {
            tracing::warn!("ignoring empty user message");
            return;
        }
        if !self.queue.is_empty() {
            tracing::info!(
                outstanding = self.queue.len(),
                "user message sent while approvals are outstanding"
            );
        }

        self.append(Message::user_text(text));
        self.scheduler.begin_turn();
        self.emit_state();
        self.run_assistant_turn().await;
        self.drive().await;
    }

    /// Approve and execute the current invocation.
    ///
    /// Returns `false` if nothing was awaiting approval.
    pub async fn approve_current(&mut self) -> bool {
        let Some(invocation) = self.queue.approve_current() else {
            return false;
        };
        self.set_tool_status(&invocation.id, invocation.status);
        self.execute_invocation(invocation).await;

        self.promote_next();
        self.drive().await;
        true
    }

    /// Deny the current invocation. Nothing is executed.
    pub async fn deny_current(&mut self) -> bool {
        let Some(invocation) = self.queue.deny_current() else {
            return false;
        };
        tracing::info!(tool = %invocation.name, invocation_id = %invocation.id, "tool call denied");
        self.set_tool_status(&invocation.id, invocation.status);
        self.append(Message::notice(
            NoticeKind::Denied,
            format!("Tool call `{}` was denied.", invocation.name),
        ));

        self.promote_next();
        self.drive().await;
        true
    }

    /// Approve everything queued and execute it as one concurrent batch.
    ///
    /// Returns the number of invocations approved.
    pub async fn approve_all(&mut self) -> usize {
        let batch = self.queue.approve_all();
        if batch.is_empty() {
            return 0;
        }
        let count = batch.len();
        for invocation in &batch {
            self.set_tool_status(&invocation.id, invocation.status);
        }

        let reports = self.executor.execute_batch(batch).await;
        for report in reports {
            self.record_report(report);
        }

        self.drive().await;
        count
    }

    /// Deny everything queued, with one summary notice.
    pub async fn deny_all(&mut self) -> usize {
        let batch = self.queue.deny_all();
        if batch.is_empty() {
            return 0;
        }
        for invocation in &batch {
            self.set_tool_status(&invocation.id, invocation.status);
        }

        let names: Vec<&str> = batch.iter().map(|i| i.name.as_str()).collect();
        let summary = format!(
            "Denied {} tool call{}: {}.",
            batch.len(),
            if batch.len() == 1 { "" } else { "s" },
            names.join(", ")
        );
        tracing::info!(count = batch.len(), "denied all queued tool calls");
        self.append(Message::notice(NoticeKind::Denied, summary));

        self.drive().await;
        batch.len()
    }

    /// Switch auto-approve. Invocations already queued stay queued.
    pub fn set_auto_approve(&mut self, enabled: bool) {
        self.queue.set_auto_approve(enabled);
        tracing::info!(auto_approve = enabled, "auto-approve changed");
    }

    pub fn toggle_approval_details(&mut self) {
        self.queue.toggle_details();
    }

    /// Re-evaluate the continuation rule and run any due turns.
    pub async fn resume_if_ready(&mut self) {
        self.drive().await;
    }

    // ─── Turn Loop ──────────────────────────────────────────────────────

    /// Evaluate the scheduler until it holds. Each resume runs one gateway
    /// turn, which may execute tools and make another resume due.
    async fn drive(&mut self) {
        loop {
            let decision = self.scheduler.evaluate(
                &self.history,
                self.executor.pending_count(),
                self.queue.len(),
            );
            self.emit_state();

            match decision {
                ContinuationDecision::Resume { trigger } => {
                    tracing::info!(
                        conversation_id = %self.conversation_id,
                        trigger = %trigger,
                        "continuing after tool results"
                    );
                    self.run_assistant_turn().await;
                }
                ContinuationDecision::Hold(_) => break,
            }
        }
    }

    /// One gateway call. The scheduler must already be marked in flight.
    async fn run_assistant_turn(&mut self) {
        let cleaned = clean_for_gateway(&self.history, &self.placeholder);
        if !is_adjacency_valid(&cleaned) {
            tracing::error!("cleaned history violates tool-call adjacency");
        }

        let request = GatewayRequest {
            conversation_id: self.conversation_id.clone(),
            messages: cleaned.iter().map(GatewayMessage::from).collect(),
            tools: self.executor.registry().descriptors(),
            streaming: self.streaming,
        };

        let gateway = Arc::clone(&self.gateway);
        let response = match gateway.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    error = %e,
                    "gateway call failed"
                );
                self.append(Message::notice(NoticeKind::Error, format!("Error: {e}")));
                self.scheduler.finish_turn(false);
                self.emit_state();
                return;
            }
        };

        let mut parsed = response.parse();
        if parsed.is_empty() {
            tracing::warn!(
                conversation_id = %self.conversation_id,
                "gateway returned an empty response"
            );
            self.scheduler.finish_turn(true);
            self.emit_state();
            return;
        }

        if let Some(call) = parsed.tool_call.as_mut() {
            if self.call_id_in_use(&call.id) {
                let fresh = generate_call_id();
                tracing::warn!(
                    conversation_id = %self.conversation_id,
                    reused_id = %call.id,
                    new_id = %fresh,
                    "gateway reused a tool-call id, assigning a fresh one"
                );
                call.id = fresh;
            }
        }

        let tool_call = parsed.tool_call.clone();
        let mut message = Message::assistant_blocks(parsed.into_blocks());
        if let Some(call) = &tool_call {
            message
                .tool_status
                .insert(call.id.clone(), InvocationStatus::Pending);
        }
        self.append(message);
        self.scheduler.finish_turn(true);

        if let Some(call) = tool_call {
            self.enqueue(ToolInvocation::from_call(&call)).await;
        }
    }

    /// Whether `call_id` already belongs to an invocation in this conversation.
    fn call_id_in_use(&self, call_id: &str) -> bool {
        self.executor.is_pending(call_id)
            || self.queue.current().is_some_and(|i| i.id == call_id)
            || self.queue.backlog().any(|i| i.id == call_id)
            || self.history.iter().any(|m| {
                m.tool_status.contains_key(call_id)
                    || extract_tool_calls(m).iter().any(|c| c.id == call_id)
            })
    }

    async fn enqueue(&mut self, invocation: ToolInvocation) {
        match self.queue.enqueue(invocation) {
            EnqueueOutcome::ExecuteNow(invocation) => {
                self.set_tool_status(&invocation.id, invocation.status);
                self.execute_invocation(invocation).await;
            }
            EnqueueOutcome::Current => self.announce_current(),
            EnqueueOutcome::Backlogged(position) => {
                tracing::debug!(position, "tool call queued behind current approval");
            }
        }
    }

    async fn execute_invocation(&mut self, invocation: ToolInvocation) {
        let report = match self.executor.admit(invocation) {
            Admission::Refused(report) => report,
            Admission::Dispatch(invocation) => {
                self.set_tool_status(&invocation.id, invocation.status);
                let result = self.executor.dispatch(&invocation).await;
                self.executor.settle(invocation, result)
            }
        };
        self.record_report(report);
    }

    // ─── History Mutation ───────────────────────────────────────────────

    fn record_report(&mut self, report: ExecutionReport) {
        self.set_tool_status(&report.invocation.id, report.invocation.status);
        self.append(report.message);
    }

    fn append(&mut self, message: Message) {
        if let Some(store) = &self.store {
            if let Err(e) = store.append_message(&self.conversation_id, &message) {
                tracing::warn!(
                    session_id = %self.conversation_id,
                    error = %e,
                    "failed to persist message"
                );
            }
        }
        self.emit(OrchestratorEvent::MessageAppended(message.clone()));
        self.history.push(message);
    }

    /// Update the tool status on the most recent message carrying `call_id`.
    fn set_tool_status(&mut self, call_id: &str, status: InvocationStatus) {
        let Some(message) = self
            .history
            .iter_mut()
            .rev()
            .find(|m| m.tool_status.contains_key(call_id))
        else {
            tracing::debug!(call_id = %call_id, "no message carries this tool call");
            return;
        };

        message.tool_status.insert(call_id.to_string(), status);
        let updated = message.clone();

        if let Some(store) = &self.store {
            if let Err(e) = store.update_message(&self.conversation_id, &updated) {
                tracing::warn!(
                    session_id = %self.conversation_id,
                    error = %e,
                    "failed to persist tool status"
                );
            }
        }
        self.emit(OrchestratorEvent::MessageUpdated(updated));
    }

    // ─── Events ─────────────────────────────────────────────────────────

    /// Promote the next backlog entry once the previous decision has been
    /// carried out, and announce it.
    fn promote_next(&mut self) {
        if self.queue.promote_next().is_some() {
            self.announce_current();
        }
    }

    fn announce_current(&self) {
        if let Some(current) = self.queue.current() {
            self.emit(OrchestratorEvent::ApprovalRequested {
                invocation: current.clone(),
                preview: generate_preview(&current.name, &current.params),
            });
        }
    }

    fn emit_state(&mut self) {
        let state = self.scheduler.state();
        if state != self.last_state {
            tracing::debug!(from = ?self.last_state, to = ?state, "conversation state changed");
            self.last_state = state;
            self.emit(OrchestratorEvent::StateChanged(state));
        }
    }

    fn emit(&self, event: OrchestratorEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
