use clap::Parser;
use serde::{Deserialize, Serialize};
use serde_json::Value;
pub mod aggregate;
pub mod emitter;
pub mod logger;
pub mod parser;
pub mod server;
pub mod streaming;
use crate::core::{Backend, FinishReason, RawUsage};
use crate::server::streaming::Streamer;
use crate::tools::{Tool, ToolCall};
use crate::utils::config::{ParserConfig, StreamOptions};
use axum::extract::Json;
use axum::http::{self, StatusCode};
use axum::response::{IntoResponse, Sse};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ChatCompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub tools: Option<Vec<Tool>>,
    pub tool_choice: Option<Value>,
    pub stream_options: Option<Value>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Usage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl From<&RawUsage> for Usage {
    fn from(raw: &RawUsage) -> Self {
        Self {
            prompt_tokens: raw.prefill_count,
            completion_tokens: raw.decode_count,
            total_tokens: raw.prefill_count + raw.decode_count,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ChatChoice {
    pub index: usize,
    pub message: AssistantMessage,
    pub finish_reason: FinishReason,
}

#[derive(Serialize, Debug, Clone)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChatChoice>,
    pub usage: Usage,
    pub system_fingerprint: String,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct FunctionDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub arguments: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub tool_type: Option<String>,
    pub function: FunctionDelta,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatChoiceChunk {
    pub index: usize,
    pub delta: Delta,
    pub finish_reason: Option<FinishReason>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: &'static str,
    pub created: u64,
    pub model: String,
    pub system_fingerprint: String,
    pub choices: Vec<ChatChoiceChunk>,
    pub usage: Option<Usage>,
}

#[derive(Serialize, Debug, Clone)]
pub struct ModelCard {
    pub id: String,
    pub name: String,
}

#[derive(Serialize, Debug, Clone)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<ModelCard>,
}

/// Random `fp_` fingerprint attached to every chunk and response.
pub fn system_fingerprint() -> String {
    format!("fp_{}", &Uuid::new_v4().simple().to_string()[..12])
}

/// Stream-level failures. Extraction failures never get here; the parser
/// recovers from them locally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("backend stream failed: {0}")]
    Backend(String),
    #[error("backend stream ended without a usage record")]
    MissingUsage,
    #[error("client disconnected before the stream completed")]
    Cancelled,
}

pub struct ServerData {
    pub backend: Arc<dyn Backend>,
    pub model_name: String,
    pub parser_config: ParserConfig,
    pub stream_options: StreamOptions,
    /// Checked by the auth layer in front of this server, not here.
    pub api_key: Option<String>,
}

trait ErrorToResponse: Serialize {
    fn to_response(&self, code: StatusCode) -> axum::response::Response {
        let mut r = Json(self).into_response();
        *r.status_mut() = code;
        r
    }
}

#[derive(Serialize)]
struct JsonError {
    message: String,
}

impl JsonError {
    fn new(message: String) -> Self {
        Self { message }
    }
}
impl ErrorToResponse for JsonError {}

pub enum ChatResponder {
    Streamer(Sse<Streamer>),
    Completion(ChatCompletionResponse),
    Models(ModelList),
    InternalError(String),
    ValidationError(String),
}

impl IntoResponse for ChatResponder {
    fn into_response(self) -> axum::response::Response {
        match self {
            ChatResponder::Streamer(s) => s.into_response(),
            ChatResponder::Completion(s) => Json(s).into_response(),
            ChatResponder::Models(s) => Json(s).into_response(),
            ChatResponder::InternalError(e) => {
                JsonError::new(e).to_response(http::StatusCode::INTERNAL_SERVER_ERROR)
            }
            ChatResponder::ValidationError(e) => {
                JsonError::new(e).to_response(http::StatusCode::UNPROCESSABLE_ENTITY)
            }
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Recorded generation to replay (JSON: {"tokens": [...], "usage": {...}})
    #[arg(long)]
    pub transcript: String,

    /// Model name reported in responses and /v1/models
    #[arg(long, default_value = "default")]
    pub model_name: String,

    /// Print SSE frames instead of the aggregated response
    #[arg(long, default_value_t = false)]
    pub stream: bool,

    /// Serve the transcript over an OpenAI-compatible HTTP API
    #[arg(long, default_value_t = false)]
    pub server: bool,

    #[arg(long, default_value_t = 8000)]
    pub port: u16,

    /// Keep streaming after the first tool call block (aggregate behavior)
    #[arg(long, default_value_t = false)]
    pub continue_after_tool_call: bool,

    /// API key expected from clients. Enforcement is left to the auth layer.
    #[arg(long)]
    pub api_key: Option<String>,

    /// Abandon a tool call block once it grows past this many bytes
    #[arg(long, default_value_t = crate::utils::config::DEFAULT_MAX_CAPTURE_BYTES)]
    pub max_capture_bytes: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_is_derived_from_counts() {
        let raw = RawUsage {
            prefill_count: 12,
            decode_count: 30,
            ..Default::default()
        };
        assert_eq!(
            Usage::from(&raw),
            Usage {
                prompt_tokens: 12,
                completion_tokens: 30,
                total_tokens: 42
            }
        );
    }

    #[test]
    fn empty_delta_serializes_as_empty_object() {
        let chunk = ChatChoiceChunk {
            index: 0,
            delta: Delta::default(),
            finish_reason: Some(FinishReason::ToolCalls),
        };
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["delta"], serde_json::json!({}));
        assert_eq!(json["finish_reason"], "tool_calls");
    }

    #[test]
    fn request_accepts_minimal_and_tool_fields() {
        let request: ChatCompletionRequest = serde_json::from_str(
            r#"{
                "model": "deepseek",
                "stream": true,
                "messages": [{"role": "user", "content": "weather?"}],
                "tools": [{"type": "function", "function": {"name": "get_weather", "parameters": {"type": "object"}}}],
                "tool_choice": "auto"
            }"#,
        )
        .unwrap();
        assert!(request.stream);
        assert_eq!(request.frequency_penalty, None);
        assert_eq!(request.tools.unwrap()[0].function.name, "get_weather");
    }

    #[test]
    fn request_accepts_sampling_penalties() {
        let request: ChatCompletionRequest = serde_json::from_str(
            r#"{"model": "m", "messages": [], "frequency_penalty": 0.5, "presence_penalty": -1.0}"#,
        )
        .unwrap();
        assert_eq!(request.frequency_penalty, Some(0.5));
        assert_eq!(request.presence_penalty, Some(-1.0));
    }

    #[test]
    fn api_key_is_optional() {
        let args = Args::try_parse_from(["tool-stream", "--transcript", "t.json"]).unwrap();
        assert_eq!(args.api_key, None);
        assert_eq!(args.model_name, "default");
        let args = Args::try_parse_from([
            "tool-stream",
            "--transcript",
            "t.json",
            "--api-key",
            "sk-local",
        ])
        .unwrap();
        assert_eq!(args.api_key.as_deref(), Some("sk-local"));
    }

    #[test]
    fn fingerprint_format() {
        let fp = system_fingerprint();
        assert!(fp.starts_with("fp_"));
        assert_eq!(fp.len(), 15);
    }
}
