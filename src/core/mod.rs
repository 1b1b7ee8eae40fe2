pub mod backend;

use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::server::ChatCompletionRequest;

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        {
            tracing::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        {
            tracing::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        {
            tracing::error!($($arg)*);
        }
    };
}

/// Why the backend stopped generating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCalls,
    ContentFilter,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Length => "length",
            FinishReason::ToolCalls => "tool_calls",
            FinishReason::ContentFilter => "content_filter",
        }
    }
}

impl fmt::Display for FinishReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded unit of generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    #[serde(default)]
    pub finish_reason: Option<FinishReason>,
}

impl Token {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: None,
        }
    }

    pub fn finished(text: impl Into<String>, reason: FinishReason) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some(reason),
        }
    }
}

/// Terminal accounting record, always the last item of a backend stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUsage {
    pub tokenize_time: f64,
    pub prefill_time: f64,
    pub decode_time: f64,
    pub prefill_count: usize,
    pub decode_count: usize,
}

impl RawUsage {
    fn rate(count: usize, secs: f64) -> f64 {
        if secs > 0.0 {
            count as f64 / secs
        } else {
            0.0
        }
    }

    pub fn log_summary(&self, request_id: &str) {
        crate::log_info!(
            "[{}] Prompt: {} tokens in {:.2}s ({:.2} tokens/s), Decoded: {} tokens in {:.2}s ({:.2} tokens/s)",
            request_id,
            self.prefill_count,
            self.prefill_time,
            Self::rate(self.prefill_count, self.prefill_time),
            self.decode_count,
            self.decode_time,
            Self::rate(self.decode_count, self.decode_time),
        );
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Token(Token),
    Usage(RawUsage),
}

/// Stream of generation items for a single request. An `Err` aborts the stream.
pub type TokenStream = BoxStream<'static, Result<StreamItem, String>>;

/// Producer of token streams. One call per request; the returned stream is
/// consumed sequentially and dropping it cancels the generation.
pub trait Backend: Send + Sync {
    fn inference(&self, request: &ChatCompletionRequest, request_id: &str) -> TokenStream;
}
