//! Tool-call / tool-result adjacency checks over a message history.
//!
//! The gateway only accepts a `ToolCall` with id K when the very next message
//! is a `User` message holding a `ToolResult` for K. Two passes enforce this:
//!
//! - [`repair_history`]: load-time recovery. Pairs are matched anywhere in the
//!   history; orphaned calls and results are dropped (lossy, logged).
//! - [`clean_for_gateway`]: send-time projection. Pairs must be positionally
//!   adjacent; everything else is filtered out, with a fallback chain that
//!   guarantees a non-empty result.

use std::collections::{HashMap, HashSet};

use super::types::{extract_text, ContentBlock, Message, MessageContent, Role};

// ─── Load-time Repair ───────────────────────────────────────────────────────

/// Drop tool calls without a result and results without a call.
///
/// Matching is by id across the whole history, not by position. Messages whose
/// block list ends up empty are removed. Plain-text messages pass through.
pub fn repair_history(messages: &[Message]) -> Vec<Message> {
    let mut call_index: HashMap<&str, usize> = HashMap::new();
    let mut result_index: HashMap<&str, usize> = HashMap::new();

    for (i, msg) in messages.iter().enumerate() {
        for block in msg.content.blocks() {
            match block {
                ContentBlock::ToolCall(call) => {
                    call_index.insert(call.id.as_str(), i);
                }
                ContentBlock::ToolResult(result) => {
                    result_index.insert(result.tool_call_id.as_str(), i);
                }
                ContentBlock::Text { .. } => {}
            }
        }
    }

    let mut removed_calls: Vec<String> = Vec::new();
    let mut removed_results: Vec<String> = Vec::new();
    let mut dropped_messages = 0usize;
    let mut repaired = Vec::with_capacity(messages.len());

    for msg in messages {
        let blocks = match &msg.content {
            MessageContent::Text(_) => {
                repaired.push(msg.clone());
                continue;
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let kept: Vec<ContentBlock> = blocks
            .iter()
            .filter(|block| match block {
                ContentBlock::ToolCall(call) => {
                    let keep = result_index.contains_key(call.id.as_str());
                    if !keep {
                        removed_calls.push(call.id.clone());
                    }
                    keep
                }
                ContentBlock::ToolResult(result) => {
                    let keep = call_index.contains_key(result.tool_call_id.as_str());
                    if !keep {
                        removed_results.push(result.tool_call_id.clone());
                    }
                    keep
                }
                ContentBlock::Text { .. } => true,
            })
            .cloned()
            .collect();

        if kept.is_empty() {
            dropped_messages += 1;
            continue;
        }
        if kept.len() == blocks.len() {
            repaired.push(msg.clone());
        } else {
            repaired.push(msg.with_blocks(kept));
        }
    }

    if !removed_calls.is_empty() || !removed_results.is_empty() || dropped_messages > 0 {
        tracing::warn!(
            removed_tool_calls = ?removed_calls,
            removed_tool_results = ?removed_results,
            dropped_messages,
            "repaired history: removed orphaned tool activity"
        );
    }

    repaired
}

// ─── Send-time Cleaning ─────────────────────────────────────────────────────

/// Tool-call ids that form a valid adjacent pair, keyed by message position.
///
/// `calls` holds `(index of the assistant message, id)`; `results` holds
/// `(index of the user message, id)`. Keying by position as well as id means a
/// stray duplicate of a valid id elsewhere in the history is still rejected.
#[derive(Debug, Default)]
pub struct AdjacentPairs<'a> {
    calls: HashSet<(usize, &'a str)>,
    results: HashSet<(usize, &'a str)>,
}

impl<'a> AdjacentPairs<'a> {
    /// Scan `messages` for assistant tool calls answered by the next message.
    pub fn scan(messages: &'a [Message]) -> Self {
        let mut pairs = Self::default();

        for (i, msg) in messages.iter().enumerate() {
            if msg.role != Role::Assistant {
                continue;
            }
            let Some(next) = messages.get(i + 1) else {
                continue;
            };
            if next.role != Role::User {
                continue;
            }
            for block in msg.content.blocks() {
                let ContentBlock::ToolCall(call) = block else {
                    continue;
                };
                let answered = next.content.blocks().iter().any(|b| {
                    matches!(b, ContentBlock::ToolResult(r) if r.tool_call_id == call.id)
                });
                if answered {
                    pairs.calls.insert((i, call.id.as_str()));
                    pairs.results.insert((i + 1, call.id.as_str()));
                }
            }
        }

        pairs
    }

    fn keeps(&self, index: usize, block: &ContentBlock) -> bool {
        match block {
            ContentBlock::ToolCall(call) => self.calls.contains(&(index, call.id.as_str())),
            ContentBlock::ToolResult(result) => {
                self.results.contains(&(index, result.tool_call_id.as_str()))
            }
            ContentBlock::Text { .. } => true,
        }
    }

    /// Number of valid call/result pairs found.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Project a history into what may be sent to the gateway.
///
/// Only positionally adjacent call/result pairs survive. If nothing survives,
/// falls back to the user messages flattened to text, and then to a single
/// placeholder user message. Never returns an empty vector.
pub fn clean_for_gateway(messages: &[Message], placeholder: &str) -> Vec<Message> {
    let pairs = AdjacentPairs::scan(messages);
    let mut cleaned = Vec::with_capacity(messages.len());
    let mut filtered_blocks = 0usize;

    for (i, msg) in messages.iter().enumerate() {
        let blocks = match &msg.content {
            MessageContent::Text(_) => {
                cleaned.push(msg.clone());
                continue;
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let kept: Vec<ContentBlock> = blocks
            .iter()
            .filter(|block| pairs.keeps(i, block))
            .cloned()
            .collect();
        filtered_blocks += blocks.len() - kept.len();

        if !kept.is_empty() {
            cleaned.push(msg.with_blocks(kept));
        }
    }

    if filtered_blocks > 0 {
        tracing::debug!(
            filtered_blocks,
            valid_pairs = pairs.len(),
            "filtered non-adjacent tool blocks before gateway call"
        );
    }

    if !cleaned.is_empty() {
        return cleaned;
    }

    // Fallback 1: user messages as plain text.
    let user_only: Vec<Message> = messages
        .iter()
        .filter(|m| m.role == Role::User)
        .filter_map(|m| {
            let text = extract_text(&m.content);
            if text.trim().is_empty() {
                return None;
            }
            Some(Message {
                content: MessageContent::Text(text),
                ..m.clone()
            })
        })
        .collect();

    if !user_only.is_empty() {
        tracing::warn!(
            kept = user_only.len(),
            "cleaned history was empty, falling back to user text"
        );
        return user_only;
    }

    // Fallback 2: placeholder.
    tracing::warn!("cleaned history was empty, sending placeholder message");
    vec![Message::user_text(placeholder)]
}

/// Check that every tool call and tool result in `messages` is part of an
/// adjacent pair.
pub fn is_adjacency_valid(messages: &[Message]) -> bool {
    let pairs = AdjacentPairs::scan(messages);
    messages.iter().enumerate().all(|(i, msg)| {
        msg.content
            .blocks()
            .iter()
            .all(|block| pairs.keeps(i, block))
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
