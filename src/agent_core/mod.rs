//! Agent Core: conversation and tool-call orchestration.
//!
//! Submodules:
//! - `types`: Messages, content blocks, tool invocations
//! - `adjacency`: History repair and gateway-bound call/result filtering
//! - `approval`: Current + backlog approval queue, action previews
//! - `loop_guard`: Repeated-call detection within a sliding window
//! - `executor`: Loop check, backend dispatch, result truncation
//! - `continuation`: Decides when tool results trigger another gateway turn
//! - `orchestrator`: Owns the history and ties the pieces together
//! - `database`: SQLite persistence for sessions and messages
//! - `errors`: Agent-level error types

pub mod adjacency;
pub mod approval;
pub mod continuation;
pub mod database;
pub mod errors;
pub mod executor;
pub mod loop_guard;
pub mod orchestrator;
pub mod types;

// Re-exports for convenience
pub use approval::{generate_preview, ApprovalQueue, EnqueueOutcome};
pub use continuation::{ContinuationDecision, ContinuationScheduler, ConversationState};
pub use database::{SessionInfo, SessionStore, SqliteSessionStore};
pub use errors::AgentError;
pub use executor::{ExecutionReport, ToolExecutor};
pub use loop_guard::{Clock, LoopGuard, SystemClock};
pub use orchestrator::{ConversationOrchestrator, OrchestratorEvent};
pub use types::{
    ContentBlock, InvocationStatus, Message, MessageContent, MessageId, NoticeKind, Role,
    ToolCall, ToolInvocation, ToolResult,
};
