// src/server/emitter.rs
//! Streaming path: classifier results to `chat.completion.chunk` frames.

use super::logger::ChatCompletionLogger;
use super::parser::{StreamResult, StreamToolParser};
use super::{
    system_fingerprint, ChatChoiceChunk, ChatCompletionChunk, Delta, FunctionDelta, StreamError,
    ToolCallDelta, Usage,
};
use crate::core::{FinishReason, RawUsage, StreamItem, Token, TokenStream};
use crate::tools::ToolCall;
use crate::utils::config::StreamOptions;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::VecDeque;
use std::sync::Arc;

/// Builds the frames of one streamed response.
pub struct ChunkEmitter {
    id: String,
    model: String,
    created: u64,
    system_fingerprint: String,
    options: StreamOptions,
    next_tool_index: usize,
    finish_sent: bool,
    done: bool,
}

impl ChunkEmitter {
    pub fn new(id: impl Into<String>, model: impl Into<String>, options: StreamOptions) -> Self {
        Self {
            id: id.into(),
            model: model.into(),
            created: crate::utils::unix_timestamp(),
            system_fingerprint: system_fingerprint(),
            options,
            next_tool_index: 0,
            finish_sent: false,
            done: false,
        }
    }

    /// No more frames will be produced; the backend need not be polled again.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn tool_call_count(&self) -> usize {
        self.next_tool_index
    }

    fn chunk(&self, choices: Vec<ChatChoiceChunk>, usage: Option<Usage>) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk",
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: self.system_fingerprint.clone(),
            choices,
            usage,
        }
    }

    fn delta_chunk(&self, delta: Delta, finish_reason: Option<FinishReason>) -> ChatCompletionChunk {
        self.chunk(
            vec![ChatChoiceChunk {
                index: 0,
                delta,
                finish_reason,
            }],
            None,
        )
    }

    pub fn content_chunk(&self, content: String) -> ChatCompletionChunk {
        self.delta_chunk(
            Delta {
                content: Some(content),
                ..Default::default()
            },
            None,
        )
    }

    pub fn finish_chunk(&self, reason: FinishReason) -> ChatCompletionChunk {
        self.delta_chunk(Delta::default(), Some(reason))
    }

    pub fn usage_chunk(&self, usage: &RawUsage) -> ChatCompletionChunk {
        self.chunk(vec![], Some(Usage::from(usage)))
    }

    /// Open frame (index, id, name, empty arguments) then the arguments frame.
    fn tool_call_chunks(&mut self, call: ToolCall) -> [ChatCompletionChunk; 2] {
        let index = self.next_tool_index;
        self.next_tool_index += 1;
        let open = Delta {
            role: Some("assistant"),
            tool_calls: Some(vec![ToolCallDelta {
                index,
                id: Some(call.id),
                tool_type: Some(call.tool_type),
                function: FunctionDelta {
                    name: Some(call.function.name),
                    arguments: String::new(),
                },
            }]),
            ..Default::default()
        };
        let args = Delta {
            tool_calls: Some(vec![ToolCallDelta {
                index,
                id: None,
                tool_type: None,
                function: FunctionDelta {
                    name: None,
                    arguments: call.function.arguments,
                },
            }]),
            ..Default::default()
        };
        [self.delta_chunk(open, None), self.delta_chunk(args, None)]
    }

    fn final_reason(&self, reason: FinishReason) -> FinishReason {
        if self.next_tool_index > 0 {
            FinishReason::ToolCalls
        } else {
            reason
        }
    }

    fn push_finish(&mut self, reason: FinishReason, out: &mut Vec<ChatCompletionChunk>) {
        if !self.finish_sent {
            self.finish_sent = true;
            out.push(self.finish_chunk(self.final_reason(reason)));
        }
    }

    /// Frames for one classifier result.
    pub fn emit(&mut self, result: StreamResult) -> Vec<ChatCompletionChunk> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        match result {
            StreamResult::Content(text) | StreamResult::FlushBuffer(text) => {
                if !text.is_empty() {
                    out.push(self.content_chunk(text));
                }
            }
            StreamResult::ToolCalls(calls) => {
                for call in calls {
                    out.extend(self.tool_call_chunks(call));
                }
                if !self.options.continue_after_tool_call {
                    self.push_finish(FinishReason::ToolCalls, &mut out);
                    self.done = true;
                }
            }
            // The finishing token's own text is not streamed.
            StreamResult::Finish { reason, .. } => self.push_finish(reason, &mut out),
        }
        out
    }

    /// Terminal frames on the usage record: withheld text, a finish frame if
    /// none was sent yet, then the usage frame.
    pub fn emit_usage(
        &mut self,
        withheld: Option<String>,
        usage: &RawUsage,
    ) -> Vec<ChatCompletionChunk> {
        if self.done {
            return Vec::new();
        }
        let mut out = self.emit_end(withheld);
        out.push(self.usage_chunk(usage));
        out
    }

    /// Terminal frames when the backend is exhausted.
    pub fn emit_end(&mut self, withheld: Option<String>) -> Vec<ChatCompletionChunk> {
        let mut out = Vec::new();
        if self.done {
            return out;
        }
        if let Some(text) = withheld.filter(|t| !t.is_empty()) {
            out.push(self.content_chunk(text));
        }
        self.push_finish(FinishReason::Stop, &mut out);
        self.done = true;
        out
    }
}

struct ChunkDriver {
    tokens: Option<TokenStream>,
    parser: StreamToolParser,
    emitter: ChunkEmitter,
    queue: VecDeque<ChatCompletionChunk>,
    logger: Option<Arc<ChatCompletionLogger>>,
}

impl ChunkDriver {
    fn on_token(&mut self, token: Token) {
        if let Some(logger) = &self.logger {
            logger.log_stream_token(&token.text);
        }
        for result in self.parser.process_token(&token.text, token.finish_reason) {
            self.queue.extend(self.emitter.emit(result));
            if self.emitter.is_done() {
                break;
            }
        }
        if self.emitter.is_done() {
            crate::log_info!(
                "[{}] Stream finished after {} tool call(s)",
                self.emitter.id,
                self.emitter.tool_call_count()
            );
            self.stop();
        }
    }

    fn on_usage(&mut self, usage: RawUsage) {
        usage.log_summary(&self.emitter.id);
        let withheld = self.parser.finish();
        let frames = self.emitter.emit_usage(withheld, &usage);
        self.queue.extend(frames);
        self.stop();
    }

    fn on_end(&mut self) {
        crate::log_warn!(
            "[{}] Backend stream ended without a usage record",
            self.emitter.id
        );
        let withheld = self.parser.finish();
        let frames = self.emitter.emit_end(withheld);
        self.queue.extend(frames);
        self.stop();
    }

    // Dropping the backend stream cancels the generation.
    fn stop(&mut self) {
        self.tokens = None;
        if let (Some(logger), Some(last)) = (&self.logger, self.queue.back()) {
            logger.log_stream_end(last);
        }
    }
}

/// Drive `tokens` through the classifier and emitter, yielding frames in order.
///
/// The backend is polled only while the next frame is requested, so a
/// consumer that stops reading also stops generation. A backend error is
/// yielded once and ends the stream.
pub fn chunk_stream(
    tokens: TokenStream,
    parser: StreamToolParser,
    emitter: ChunkEmitter,
    logger: Option<Arc<ChatCompletionLogger>>,
) -> BoxStream<'static, Result<ChatCompletionChunk, StreamError>> {
    let driver = ChunkDriver {
        tokens: Some(tokens),
        parser,
        emitter,
        queue: VecDeque::new(),
        logger,
    };
    stream::unfold(driver, |mut driver| async move {
        loop {
            if let Some(chunk) = driver.queue.pop_front() {
                return Some((Ok(chunk), driver));
            }
            let tokens = driver.tokens.as_mut()?;
            let item = tokens.next().await;
            match item {
                Some(Ok(StreamItem::Token(token))) => driver.on_token(token),
                Some(Ok(StreamItem::Usage(usage))) => driver.on_usage(usage),
                Some(Err(e)) => {
                    crate::log_error!("[{}] Backend stream failed: {}", driver.emitter.id, e);
                    if let Some(logger) = &driver.logger {
                        logger.log_error(&e);
                    }
                    driver.tokens = None;
                    return Some((Err(StreamError::Backend(e)), driver));
                }
                None => driver.on_end(),
            }
        }
    })
    .boxed()
}
