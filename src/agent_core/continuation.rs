//! Continuation scheduler.
//!
//! Decides, after every history mutation, whether the conversation should
//! resume automatically with another gateway call. A resume happens at most
//! once per qualifying tool-result message, never while tools are executing
//! or approvals are outstanding, and never directly after an error notice.

use serde::Serialize;

use super::types::{Message, MessageId, Role};

/// Where the conversation stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Idle,
    /// A gateway call is in flight.
    AwaitingAssistant,
    /// The approval queue is non-empty.
    AwaitingApproval,
    /// The pending-execution set is non-empty.
    ExecutingTools,
    /// The last turn ended in an error; only a new user message resumes.
    Paused,
}

/// Result of [`ContinuationScheduler::evaluate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContinuationDecision {
    /// Issue the next gateway call now. `trigger` is the consumed message.
    Resume { trigger: MessageId },
    /// Do nothing; the conversation is in the given state.
    Hold(ConversationState),
}

#[derive(Debug, Clone)]
pub struct ContinuationScheduler {
    state: ConversationState,
    /// Identity of the last message that triggered a continuation.
    last_processed: Option<MessageId>,
    /// Set while a gateway call is in flight.
    continuing: bool,
}

impl Default for ContinuationScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl ContinuationScheduler {
    pub fn new() -> Self {
        Self {
            state: ConversationState::Idle,
            last_processed: None,
            continuing: false,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn is_continuing(&self) -> bool {
        self.continuing
    }

    pub fn last_processed(&self) -> Option<&MessageId> {
        self.last_processed.as_ref()
    }

    /// Evaluate the transition rule against the current history.
    ///
    /// On `Resume` the trigger is recorded and the in-flight flag is set; the
    /// caller must report back through [`finish_turn`](Self::finish_turn).
    pub fn evaluate(
        &mut self,
        history: &[Message],
        pending_executions: usize,
        approvals_outstanding: usize,
    ) -> ContinuationDecision {
        if self.continuing {
            return ContinuationDecision::Hold(ConversationState::AwaitingAssistant);
        }
        if pending_executions > 0 {
            return self.hold(ConversationState::ExecutingTools);
        }
        if approvals_outstanding > 0 {
            return self.hold(ConversationState::AwaitingApproval);
        }

        let Some(last) = history.last() else {
            return self.hold(ConversationState::Idle);
        };
        if last.is_error_notice() {
            return self.hold(ConversationState::Paused);
        }
        if last.role != Role::User || !last.has_tool_result() {
            return self.hold(ConversationState::Idle);
        }
        if self.last_processed.as_ref() == Some(&last.id) {
            return self.hold(ConversationState::Idle);
        }

        let previous_is_error = history.len() >= 2 && history[history.len() - 2].is_error_notice();
        if previous_is_error {
            tracing::info!(
                message_id = %last.id,
                "tool result follows an error notice, not continuing"
            );
            return self.hold(ConversationState::Paused);
        }

        self.last_processed = Some(last.id.clone());
        self.continuing = true;
        self.state = ConversationState::AwaitingAssistant;
        tracing::debug!(trigger = %last.id, "auto-continuing conversation");
        ContinuationDecision::Resume {
            trigger: last.id.clone(),
        }
    }

    /// Start a user-initiated gateway turn.
    pub fn begin_turn(&mut self) {
        self.continuing = true;
        self.state = ConversationState::AwaitingAssistant;
    }

    /// The in-flight gateway call returned. A failed call pauses the
    /// conversation until the next user message.
    pub fn finish_turn(&mut self, succeeded: bool) {
        self.continuing = false;
        self.state = if succeeded {
            ConversationState::Idle
        } else {
            ConversationState::Paused
        };
    }

    /// Treat the current last message as already consumed.
    ///
    /// Used for histories loaded from storage so a trailing tool result does
    /// not trigger a continuation on load.
    pub fn mark_consumed(&mut self, history: &[Message]) {
        self.last_processed = history.last().map(|m| m.id.clone());
    }

    fn hold(&mut self, state: ConversationState) -> ContinuationDecision {
        self.state = state;
        ContinuationDecision::Hold(state)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_core::types::{ContentBlock, NoticeKind, ToolCall};

    fn call_turn(id: &str) -> Vec<Message> {
        vec![
            Message::user_text("read a"),
            Message::assistant_blocks(vec![ContentBlock::ToolCall(ToolCall {
                id: id.to_string(),
                name: "read_file".to_string(),
                params: serde_json::Map::new(),
            })]),
            Message::tool_result(id, "contents"),
        ]
    }

    #[test]
    fn test_resumes_once_per_qualifying_message() {
        let mut scheduler = ContinuationScheduler::new();
        let history = call_turn("c1");

        let decision = scheduler.evaluate(&history, 0, 0);
        assert_eq!(
            decision,
            ContinuationDecision::Resume {
                trigger: history[2].id.clone()
            }
        );

        // Re-evaluated while the call is in flight.
        assert_eq!(
            scheduler.evaluate(&history, 0, 0),
            ContinuationDecision::Hold(ConversationState::AwaitingAssistant)
        );

        // And after it completes.
        scheduler.finish_turn(true);
        assert_eq!(
            scheduler.evaluate(&history, 0, 0),
            ContinuationDecision::Hold(ConversationState::Idle)
        );
    }

    #[test]
    fn test_new_tool_result_resumes_again() {
        let mut scheduler = ContinuationScheduler::new();
        let mut history = call_turn("c1");
        assert!(matches!(
            scheduler.evaluate(&history, 0, 0),
            ContinuationDecision::Resume { .. }
        ));
        scheduler.finish_turn(true);

        history.extend(call_turn("c2").into_iter().skip(1));
        assert!(matches!(
            scheduler.evaluate(&history, 0, 0),
            ContinuationDecision::Resume { .. }
        ));
    }

    #[test]
    fn test_holds_while_tools_executing() {
        let mut scheduler = ContinuationScheduler::new();
        let history = call_turn("c1");
        assert_eq!(
            scheduler.evaluate(&history, 1, 0),
            ContinuationDecision::Hold(ConversationState::ExecutingTools)
        );
        // Not consumed by the held evaluation.
        assert!(matches!(
            scheduler.evaluate(&history, 0, 0),
            ContinuationDecision::Resume { .. }
        ));
    }

    #[test]
    fn test_holds_while_approvals_outstanding() {
        let mut scheduler = ContinuationScheduler::new();
        let history = call_turn("c1");
        assert_eq!(
            scheduler.evaluate(&history, 0, 2),
            ContinuationDecision::Hold(ConversationState::AwaitingApproval)
        );
        assert_eq!(scheduler.state(), ConversationState::AwaitingApproval);
    }

    #[test]
    fn test_error_notice_before_result_pauses() {
        let mut scheduler = ContinuationScheduler::new();
        let mut history = call_turn("c1");
        let result = history.pop().unwrap();
        history.push(Message::notice(NoticeKind::Error, "Error: `x` failed"));
        history.push(result);

        assert_eq!(
            scheduler.evaluate(&history, 0, 0),
            ContinuationDecision::Hold(ConversationState::Paused)
        );
    }

    #[test]
    fn test_last_error_notice_pauses() {
        let mut scheduler = ContinuationScheduler::new();
        let history = vec![
            Message::user_text("hi"),
            Message::notice(NoticeKind::Error, "Error: gateway unreachable"),
        ];
        assert_eq!(
            scheduler.evaluate(&history, 0, 0),
            ContinuationDecision::Hold(ConversationState::Paused)
        );
    }

    #[test]
    fn test_plain_user_text_does_not_resume() {
        let mut scheduler = ContinuationScheduler::new();
        let history = vec![Message::user_text("hi")];
        assert_eq!(
            scheduler.evaluate(&history, 0, 0),
            ContinuationDecision::Hold(ConversationState::Idle)
        );
        assert_eq!(
            scheduler.evaluate(&[], 0, 0),
            ContinuationDecision::Hold(ConversationState::Idle)
        );
    }

    #[test]
    fn test_mark_consumed_suppresses_loaded_history() {
        let mut scheduler = ContinuationScheduler::new();
        let history = call_turn("c1");
        scheduler.mark_consumed(&history);
        assert_eq!(
            scheduler.evaluate(&history, 0, 0),
            ContinuationDecision::Hold(ConversationState::Idle)
        );
    }

    #[test]
    fn test_failed_turn_pauses() {
        let mut scheduler = ContinuationScheduler::new();
        scheduler.begin_turn();
        assert!(scheduler.is_continuing());
        scheduler.finish_turn(false);
        assert!(!scheduler.is_continuing());
        assert_eq!(scheduler.state(), ConversationState::Paused);
    }
}
