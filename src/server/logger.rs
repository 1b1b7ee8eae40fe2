// src/server/logger.rs
//! Chat completion request/response logger.
//! Enable by setting environment variable TOOL_STREAM_CHAT_LOGGER=true

use super::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse};
use crate::tools::ToolCall;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

pub const CHAT_LOGGER_ENV: &str = "TOOL_STREAM_CHAT_LOGGER";

/// Check if chat logging is enabled via environment variable
pub fn is_logging_enabled() -> bool {
    std::env::var(CHAT_LOGGER_ENV)
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false)
}

/// Writes one request's traffic to its own file under `log/`.
pub struct ChatCompletionLogger {
    file_path: String,
}

impl ChatCompletionLogger {
    /// Returns None if logging is disabled.
    pub fn new(request_id: &str) -> Option<Arc<Self>> {
        if !is_logging_enabled() {
            return None;
        }

        let log_dir = Path::new("log");
        if !log_dir.exists() {
            let _ = fs::create_dir_all(log_dir);
        }

        let file_path = format!("log/{}_{}.log", crate::utils::unix_timestamp(), request_id);
        crate::log_info!("Chat logging enabled, writing to: {}", file_path);
        Some(Arc::new(Self { file_path }))
    }

    fn write(&self, content: &str) {
        if let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.file_path)
        {
            let _ = file.write_all(content.as_bytes());
        }
    }

    pub fn log_request(&self, request: &ChatCompletionRequest) {
        if let Ok(json) = serde_json::to_string_pretty(request) {
            self.write(&format!("=== REQUEST ===\n{}\n\n=== MODEL RESPONSE ===\n", json));
        }
    }

    pub fn log_stream_token(&self, token: &str) {
        self.write(token);
    }

    /// Log raw tool call body before parsing
    pub fn log_raw_tool_body(&self, raw: &str) {
        self.write(&format!("\n\n=== RAW TOOL BODY ===\n{}\n", raw));
    }

    /// Log parsed tool calls with a label
    pub fn log_tool_calls(&self, label: &str, tool_calls: &[ToolCall]) {
        if tool_calls.is_empty() {
            return;
        }
        if let Ok(json) = serde_json::to_string_pretty(tool_calls) {
            self.write(&format!(
                "\n=== {} TOOL CALLS ({}) ===\n{}\n",
                label.to_uppercase(),
                tool_calls.len(),
                json
            ));
        }
    }

    pub fn log_stream_end(&self, final_chunk: &ChatCompletionChunk) {
        if let Ok(json) = serde_json::to_string_pretty(final_chunk) {
            self.write(&format!("\n\n=== FINAL CHUNK ===\n{}\n", json));
        }
    }

    pub fn log_response(&self, response: &ChatCompletionResponse) {
        if let Ok(json) = serde_json::to_string_pretty(response) {
            self.write(&format!("\n=== RESPONSE ===\n{}\n", json));
        }
    }

    pub fn log_error(&self, error: &str) {
        self.write(&format!("\n=== ERROR ===\n{}\n", error));
    }
}
