// src/server/parser.rs
//! Streaming tool call parser for detecting and capturing tool calls during streaming.
//!
//! Tokens arrive one at a time and the markers that open and close an
//! invocation block can be split across any token boundary. The parser keeps
//! a short window of recent text to spot a split opening marker, withholds
//! text that might still turn into that marker, and captures everything
//! between the opening and closing markers so it never reaches the client.

use super::logger::ChatCompletionLogger;
use crate::core::FinishReason;
use crate::tools::parser::extract_tool_calls;
use crate::tools::{format_tool_calls_summary, ToolCall};
use crate::utils::config::ParserConfig;
use crate::utils::tail_buffer::TailBuffer;
use std::sync::Arc;

/// Parser state for streaming tool call detection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Normal streaming mode - text is user visible
    Text,
    /// Inside an invocation block - accumulating until the closing marker
    Capture,
}

/// Result of processing a token in the stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamResult {
    /// Visible text - send to client
    Content(String),
    /// Tool calls parsed from a completed block
    ToolCalls(Vec<ToolCall>),
    /// Capture abandoned at the size ceiling - its opening marker is visible text again
    FlushBuffer(String),
    /// The backend finished. `text` is the finishing token's own visible text,
    /// which only the aggregate path keeps.
    Finish { reason: FinishReason, text: String },
}

/// Streaming tool parser that handles tool call detection and capturing.
///
/// One instance per in-flight request; not shared between consumers.
pub struct StreamToolParser {
    config: ParserConfig,
    state: ParserState,
    // Last `window_chars` of text seen in `Text` state.
    window: TailBuffer,
    // Visible text withheld because it may be the start of the opening marker.
    pending: String,
    // Captured block text, from just after the opening marker.
    buffer: String,
    logger: Option<Arc<ChatCompletionLogger>>,
}

impl Default for StreamToolParser {
    fn default() -> Self {
        Self::new(ParserConfig::default())
    }
}

impl StreamToolParser {
    pub fn new(config: ParserConfig) -> Self {
        let window = TailBuffer::new(config.window_chars);
        Self {
            config,
            state: ParserState::Text,
            window,
            pending: String::new(),
            buffer: String::new(),
            logger: None,
        }
    }

    pub fn with_logger(mut self, logger: Option<Arc<ChatCompletionLogger>>) -> Self {
        self.logger = logger;
        self
    }

    /// Get the current parser state
    pub fn state(&self) -> ParserState {
        self.state
    }

    /// Get the captured block content
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// Text withheld as a possible marker prefix
    pub fn pending(&self) -> &str {
        &self.pending
    }

    /// Process a single incoming token.
    ///
    /// Returns the results in the order they must be surfaced. An empty
    /// vector means nothing is visible yet (capturing or withholding).
    pub fn process_token(
        &mut self,
        text: &str,
        finish_reason: Option<FinishReason>,
    ) -> Vec<StreamResult> {
        let mut results = Vec::new();
        let mut finish_text = String::new();
        let mut input = text.to_string();

        loop {
            match self.state {
                ParserState::Text => {
                    let Some(offset) = self.find_open_marker(&input) else {
                        self.window.push(&input);
                        if finish_reason.is_some() {
                            self.flush_pending(&mut results);
                            finish_text = input;
                        } else {
                            self.pending.push_str(&input);
                            let held = self.config.markers.partial_open_len(&self.pending);
                            let ready: String =
                                self.pending.drain(..self.pending.len() - held).collect();
                            if !ready.is_empty() {
                                results.push(StreamResult::Content(ready));
                            }
                        }
                        break;
                    };
                    input = self.begin_capture(&input, offset, &mut results);
                }
                ParserState::Capture => {
                    self.buffer.push_str(&input);
                    let close = self.config.markers.tool_calls_end.as_str();
                    let Some(pos) = self.buffer.find(close) else {
                        match self.abandon_oversized_capture(&mut results) {
                            // Rescan what was captured; it may hold the next block.
                            Some(captured) => {
                                input = captured;
                                continue;
                            }
                            None => break,
                        }
                    };
                    let rest = self.buffer.split_off(pos + close.len());
                    let block = std::mem::take(&mut self.buffer);
                    self.state = ParserState::Text;
                    self.complete_capture(&block, &mut results);
                    if rest.is_empty() {
                        break;
                    }
                    // Text after the closing marker is ordinary output again.
                    input = rest;
                }
            }
        }

        if let Some(reason) = finish_reason {
            results.push(StreamResult::Finish {
                reason,
                text: finish_text,
            });
        }
        results
    }

    /// Signal the end of the token stream.
    ///
    /// Returns withheld text, which can no longer become a marker. An
    /// unclosed block is discarded.
    pub fn finish(&mut self) -> Option<String> {
        if self.state == ParserState::Capture {
            crate::log_warn!(
                "Stream ended inside a tool call block, discarding {} bytes",
                self.buffer.len()
            );
            if let Some(logger) = &self.logger {
                logger.log_raw_tool_body(&self.buffer);
            }
            self.buffer.clear();
            self.state = ParserState::Text;
        }
        self.window.clear();
        let pending = std::mem::take(&mut self.pending);
        (!pending.is_empty()).then_some(pending)
    }

    /// Byte offset of the opening marker in `window + input`, if complete.
    fn find_open_marker(&self, input: &str) -> Option<usize> {
        let open = self.config.markers.tool_calls_begin.as_str();
        if self.window.is_empty() {
            return input.find(open);
        }
        let mut combined = String::with_capacity(self.window.len() + input.len());
        combined.push_str(self.window.as_str());
        combined.push_str(input);
        combined.find(open)
    }

    /// Switch to `Capture` on an opening marker at `offset` in `window + input`.
    /// Returns the part of `input` after the marker.
    fn begin_capture(
        &mut self,
        input: &str,
        offset: usize,
        results: &mut Vec<StreamResult>,
    ) -> String {
        let open_len = self.config.markers.tool_calls_begin.len();
        let window_len = self.window.len();
        if offset >= window_len {
            self.pending.push_str(&input[..offset - window_len]);
        } else {
            // The marker started in earlier tokens, whose tail is still withheld.
            let rollback = window_len - offset;
            let keep = self.pending.len().saturating_sub(rollback);
            self.pending.truncate(keep);
        }
        self.flush_pending(results);
        self.window.clear();
        self.buffer.clear();
        self.state = ParserState::Capture;
        crate::log_info!("Tool call block found, start capturing!");
        input[offset + open_len - window_len..].to_string()
    }

    fn complete_capture(&mut self, block: &str, results: &mut Vec<StreamResult>) {
        if let Some(logger) = &self.logger {
            logger.log_raw_tool_body(block);
        }
        match extract_tool_calls(block, &self.config.markers) {
            Ok(calls) => {
                crate::log_info!(
                    "Tool call block parsed: {}",
                    format_tool_calls_summary(&calls)
                );
                if let Some(logger) = &self.logger {
                    logger.log_tool_calls("parsed", &calls);
                }
                results.push(StreamResult::ToolCalls(calls));
            }
            Err(e) => {
                crate::log_warn!("Failed to extract tool call, dropping block: {}", e);
            }
        }
    }

    /// Give up on a block past the capture ceiling. The abandoned opening
    /// marker is flushed as text and the captured text is returned so it goes
    /// through `Text` processing again.
    fn abandon_oversized_capture(&mut self, results: &mut Vec<StreamResult>) -> Option<String> {
        if self.buffer.len() <= self.config.max_capture_bytes {
            return None;
        }
        crate::log_warn!(
            "Tool call block exceeded {} bytes without a closing marker, flushing as text",
            self.config.max_capture_bytes
        );
        self.state = ParserState::Text;
        results.push(StreamResult::FlushBuffer(
            self.config.markers.tool_calls_begin.clone(),
        ));
        Some(std::mem::take(&mut self.buffer))
    }

    fn flush_pending(&mut self, results: &mut Vec<StreamResult>) {
        if !self.pending.is_empty() {
            results.push(StreamResult::Content(std::mem::take(&mut self.pending)));
        }
    }
}
