// src/server/aggregate.rs
//! Non-streaming path: the whole generation folded into one `chat.completion`.

use super::logger::ChatCompletionLogger;
use super::parser::{StreamResult, StreamToolParser};
use super::{
    system_fingerprint, AssistantMessage, ChatChoice, ChatCompletionResponse, StreamError, Usage,
};
use crate::core::{FinishReason, RawUsage, StreamItem, TokenStream};
use crate::tools::ToolCall;
use futures::StreamExt;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct AggregateBuilder {
    content: String,
    tool_calls: Vec<ToolCall>,
    finish_reason: Option<FinishReason>,
    usage: Option<RawUsage>,
}

impl AggregateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, result: StreamResult) {
        match result {
            StreamResult::Content(text) | StreamResult::FlushBuffer(text) => {
                self.content.push_str(&text)
            }
            StreamResult::ToolCalls(calls) => self.tool_calls.extend(calls),
            StreamResult::Finish { reason, text } => {
                self.content.push_str(&text);
                self.finish_reason = Some(reason);
            }
        }
    }

    pub fn push_withheld(&mut self, withheld: Option<String>) {
        if let Some(text) = withheld {
            self.content.push_str(&text);
        }
    }

    pub fn set_usage(&mut self, usage: RawUsage) {
        self.usage = Some(usage);
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        &self.tool_calls
    }

    /// Tool calls suppress the text and force `tool_calls`; otherwise the
    /// last reported finish reason wins, defaulting to `stop`.
    pub fn build(
        self,
        id: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<ChatCompletionResponse, StreamError> {
        let usage = self.usage.ok_or(StreamError::MissingUsage)?;
        let (content, tool_calls, finish_reason) = if self.tool_calls.is_empty() {
            (
                Some(self.content),
                None,
                self.finish_reason.unwrap_or(FinishReason::Stop),
            )
        } else {
            (None, Some(self.tool_calls), FinishReason::ToolCalls)
        };
        Ok(ChatCompletionResponse {
            id: id.into(),
            object: "chat.completion",
            created: crate::utils::unix_timestamp(),
            model: model.into(),
            choices: vec![ChatChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content,
                    tool_calls,
                },
                finish_reason,
            }],
            usage: Usage::from(&usage),
            system_fingerprint: system_fingerprint(),
        })
    }
}

/// Consume the whole backend stream and build the aggregated response.
///
/// Unlike the streaming path, consumption continues past every tool call
/// block until the usage record.
pub async fn collect_completion(
    mut tokens: TokenStream,
    mut parser: StreamToolParser,
    id: &str,
    model: &str,
    logger: Option<Arc<ChatCompletionLogger>>,
) -> Result<ChatCompletionResponse, StreamError> {
    let mut builder = AggregateBuilder::new();
    while let Some(item) = tokens.next().await {
        match item {
            Ok(StreamItem::Token(token)) => {
                if let Some(logger) = &logger {
                    logger.log_stream_token(&token.text);
                }
                for result in parser.process_token(&token.text, token.finish_reason) {
                    builder.push(result);
                }
            }
            Ok(StreamItem::Usage(usage)) => {
                usage.log_summary(id);
                builder.set_usage(usage);
                break;
            }
            Err(e) => {
                crate::log_error!("[{}] Backend stream failed: {}", id, e);
                if let Some(logger) = &logger {
                    logger.log_error(&e);
                }
                return Err(StreamError::Backend(e));
            }
        }
    }
    builder.push_withheld(parser.finish());
    if !builder.tool_calls().is_empty() {
        crate::log_info!(
            "[{}] Completion has {} tool call(s)",
            id,
            builder.tool_calls().len()
        );
    }

    let response = builder.build(id, model);
    match (&response, &logger) {
        (Ok(response), Some(logger)) => logger.log_response(response),
        (Err(e), Some(logger)) => logger.log_error(&e.to_string()),
        _ => {}
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Token;
    use crate::tools::markers::{
        TOOL_CALLS_BEGIN, TOOL_CALLS_END, TOOL_CALL_BEGIN, TOOL_CALL_END, TOOL_SEP,
    };
    use futures::stream;
    use serde_json::{json, Value};

    fn block(name: &str, args: &str) -> String {
        format!(
            "{TOOL_CALLS_BEGIN}{TOOL_CALL_BEGIN}function{TOOL_SEP}{name}\n```json\n{args}\n```{TOOL_CALL_END}{TOOL_CALLS_END}"
        )
    }

    fn backend(tokens: Vec<Token>, usage: bool) -> TokenStream {
        let mut items: Vec<Result<StreamItem, String>> =
            tokens.into_iter().map(|t| Ok(StreamItem::Token(t))).collect();
        if usage {
            items.push(Ok(StreamItem::Usage(RawUsage {
                prefill_count: 3,
                decode_count: 4,
                ..Default::default()
            })));
        }
        stream::iter(items).boxed()
    }

    fn texts(texts: &[&str]) -> Vec<Token> {
        texts.iter().map(|t| Token::text(*t)).collect()
    }

    async fn complete(tokens: TokenStream) -> Value {
        let response = collect_completion(
            tokens,
            StreamToolParser::default(),
            "chatcmpl-test",
            "test-model",
            None,
        )
        .await
        .unwrap();
        serde_json::to_value(response).unwrap()
    }

    #[tokio::test]
    async fn plain_text_completion() {
        let response = complete(backend(texts(&["Hello", " world"]), true)).await;
        assert_eq!(response["object"], "chat.completion");
        let choice = &response["choices"][0];
        assert_eq!(choice["message"]["role"], "assistant");
        assert_eq!(choice["message"]["content"], "Hello world");
        assert_eq!(choice["message"]["tool_calls"], Value::Null);
        assert_eq!(choice["finish_reason"], "stop");
        assert_eq!(
            response["usage"],
            json!({"prompt_tokens": 3, "completion_tokens": 4, "total_tokens": 7})
        );
    }

    #[tokio::test]
    async fn split_tool_call_suppresses_content() {
        let text = format!("Sure. {}", block("get_weather", r#"{"city":"Paris"}"#));
        let mut pieces = Vec::new();
        let mut rest = text.as_str();
        while !rest.is_empty() {
            let mut cut = rest.len().min(11);
            while !rest.is_char_boundary(cut) {
                cut += 1;
            }
            let (head, tail) = rest.split_at(cut);
            pieces.push(head);
            rest = tail;
        }
        let response = complete(backend(texts(&pieces), true)).await;
        let choice = &response["choices"][0];
        assert!(choice["message"]["content"].is_null());
        assert_eq!(choice["finish_reason"], "tool_calls");
        let calls = choice["message"]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0]["function"]["name"], "get_weather");
        assert_eq!(calls[0]["function"]["arguments"], r#"{"city":"Paris"}"#);
    }

    #[tokio::test]
    async fn unmatched_fence_keeps_following_text() {
        let tokens = texts(&[
            TOOL_CALLS_BEGIN,
            format!("function{TOOL_SEP}get_weather\n").as_str(),
            "```json\nbad",
            TOOL_CALLS_END,
            "Still here",
        ]);
        let response = complete(backend(tokens, true)).await;
        let choice = &response["choices"][0];
        assert_eq!(choice["message"]["content"], "Still here");
        assert!(choice["message"]["tool_calls"].is_null());
        assert_eq!(choice["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn every_block_is_collected() {
        let first = block("first", r#"{"a":1}"#);
        let second = block("second", r#"{"b":2}"#);
        let tokens = texts(&["Let me check.", first.as_str(), " and ", second.as_str()]);
        let response = complete(backend(tokens, true)).await;
        let calls = response["choices"][0]["message"]["tool_calls"]
            .as_array()
            .unwrap()
            .clone();
        let names: Vec<&str> = calls
            .iter()
            .map(|c| c["function"]["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, ["first", "second"]);
        assert_ne!(calls[0]["id"], calls[1]["id"]);
    }

    #[tokio::test]
    async fn last_finish_reason_and_its_text_are_kept() {
        let tokens = vec![
            Token::text("Out of "),
            Token::finished("room", FinishReason::Length),
        ];
        let response = complete(backend(tokens, true)).await;
        let choice = &response["choices"][0];
        assert_eq!(choice["message"]["content"], "Out of room");
        assert_eq!(choice["finish_reason"], "length");
    }

    #[tokio::test]
    async fn missing_usage_fails() {
        let result = collect_completion(
            backend(texts(&["Hello"]), false),
            StreamToolParser::default(),
            "id",
            "m",
            None,
        )
        .await;
        assert_eq!(result.unwrap_err(), StreamError::MissingUsage);
    }

    #[tokio::test]
    async fn backend_error_fails_whole_completion() {
        let tokens = stream::iter(vec![
            Ok(StreamItem::Token(Token::text("partial"))),
            Err("device lost".to_string()),
        ])
        .boxed();
        let result =
            collect_completion(tokens, StreamToolParser::default(), "id", "m", None).await;
        assert_eq!(
            result.unwrap_err(),
            StreamError::Backend("device lost".to_string())
        );
    }
}
