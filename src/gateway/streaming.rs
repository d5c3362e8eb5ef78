//! SSE streaming response reader for the LLM gateway.
//!
//! Reads a `reqwest::Response` as a byte stream, splits on SSE boundaries
//! (`data: …\n\n`), and folds the deltas into a single [`GatewayResponse`].
//! Each `data:` payload is a [`StreamDelta`]: a text fragment, a complete
//! content block, or both. `[DONE]` ends the stream.

use futures::{Stream, StreamExt};
use serde::Deserialize;

use super::errors::GatewayError;
use super::types::GatewayResponse;
use crate::agent_core::types::ContentBlock;

/// One SSE payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamDelta {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub block: Option<ContentBlock>,
}

// ─── Accumulator ────────────────────────────────────────────────────────────

/// Folds SSE events into ordered content blocks.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    blocks: Vec<ContentBlock>,
    /// Text received since the last complete block.
    pending_text: String,
    done: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Process a single SSE event string (may contain multiple `data:` lines).
    pub fn process_event(&mut self, event: &str) -> Result<(), GatewayError> {
        let mut data_content = String::new();

        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) {
                let data = data.trim();
                if data == "[DONE]" {
                    self.done = true;
                    return Ok(());
                }
                data_content.push_str(data);
            }
        }

        if data_content.is_empty() {
            // Keep-alive or comment
            return Ok(());
        }

        let delta: StreamDelta =
            serde_json::from_str(&data_content).map_err(|e| GatewayError::StreamError {
                reason: format!("failed to parse SSE chunk: {e} (data: {data_content})"),
            })?;

        if let Some(text) = delta.text {
            self.pending_text.push_str(&text);
        }
        if let Some(block) = delta.block {
            self.flush_text();
            self.blocks.push(block);
        }
        Ok(())
    }

    /// Finish the stream and build the response.
    pub fn finish(mut self) -> GatewayResponse {
        self.flush_text();
        GatewayResponse::blocks(self.blocks)
    }

    fn flush_text(&mut self) {
        if !self.pending_text.is_empty() {
            let text = std::mem::take(&mut self.pending_text);
            self.blocks.push(ContentBlock::Text { text });
        }
    }
}

/// Read an SSE response body to completion.
pub async fn collect_sse(response: reqwest::Response) -> Result<GatewayResponse, GatewayError> {
    collect_events(response.bytes_stream()).await
}

/// Fold a raw byte stream of SSE events into a response.
///
/// Bytes are buffered until a full event (`\n\n`) has arrived, so a
/// multi-byte character split across chunks is decoded intact.
async fn collect_events<S, B, E>(mut byte_stream: S) -> Result<GatewayResponse, GatewayError>
where
    S: Stream<Item = Result<B, E>> + Unpin,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut state = StreamAccumulator::new();
    let mut buffer: Vec<u8> = Vec::new();

    while !state.is_done() {
        if let Some(event_end) = find_event_end(&buffer) {
            let event: Vec<u8> = buffer.drain(..event_end + 2).collect();
            state.process_event(decode_event(&event[..event_end])?)?;
            continue;
        }

        match byte_stream.next().await {
            Some(Ok(bytes)) => buffer.extend_from_slice(bytes.as_ref()),
            Some(Err(e)) => {
                return Err(GatewayError::StreamError {
                    reason: format!("stream read error: {e}"),
                });
            }
            None => {
                // Stream ended without [DONE]: take whatever is left.
                let rest = decode_event(&buffer)?.trim();
                if !rest.is_empty() {
                    state.process_event(rest)?;
                }
                break;
            }
        }
    }

    Ok(state.finish())
}

fn find_event_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn decode_event(bytes: &[u8]) -> Result<&str, GatewayError> {
    std::str::from_utf8(bytes).map_err(|e| GatewayError::StreamError {
        reason: format!("SSE event is not valid UTF-8: {e}"),
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
