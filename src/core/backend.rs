// src/core/backend.rs
//! Transcript replay backend.
//!
//! Replays a recorded generation (tokens plus the terminal usage record) as a
//! token stream, so recorded model output can be pushed through the tool-call
//! pipeline without running a model.

use super::{Backend, RawUsage, StreamItem, Token, TokenStream};
use crate::server::ChatCompletionRequest;
use anyhow::Context;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(untagged)]
pub enum TranscriptToken {
    PureText(String),
    Full(Token),
}

impl From<TranscriptToken> for Token {
    fn from(value: TranscriptToken) -> Self {
        match value {
            TranscriptToken::PureText(text) => Token::text(text),
            TranscriptToken::Full(token) => token,
        }
    }
}

/// A recorded generation.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Transcript {
    pub tokens: Vec<TranscriptToken>,
    #[serde(default)]
    pub usage: Option<RawUsage>,
}

pub struct ReplayBackend {
    tokens: Vec<Token>,
    usage: RawUsage,
}

impl ReplayBackend {
    pub fn new(tokens: Vec<Token>, usage: RawUsage) -> Self {
        Self { tokens, usage }
    }

    pub fn from_transcript(transcript: Transcript) -> Self {
        let tokens: Vec<Token> = transcript.tokens.into_iter().map(Token::from).collect();
        // Recordings without accounting still need a terminal record.
        let usage = transcript.usage.unwrap_or_else(|| RawUsage {
            decode_count: tokens.len(),
            ..Default::default()
        });
        Self::new(tokens, usage)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read transcript {}", path.display()))?;
        let transcript: Transcript = serde_json::from_str(&raw)
            .with_context(|| format!("invalid transcript {}", path.display()))?;
        crate::log_info!(
            "Loaded transcript {} ({} tokens)",
            path.display(),
            transcript.tokens.len()
        );
        Ok(Self::from_transcript(transcript))
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }
}

impl Backend for ReplayBackend {
    fn inference(&self, _request: &ChatCompletionRequest, request_id: &str) -> TokenStream {
        crate::log_info!(
            "[{}] Replaying {} tokens",
            request_id,
            self.tokens.len()
        );
        let items: Vec<Result<StreamItem, String>> = self
            .tokens
            .iter()
            .cloned()
            .map(|t| Ok(StreamItem::Token(t)))
            .chain(std::iter::once(Ok(StreamItem::Usage(self.usage.clone()))))
            .collect();
        futures::stream::iter(items).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FinishReason;

    #[test]
    fn transcript_accepts_plain_and_full_tokens() {
        let transcript: Transcript = serde_json::from_str(
            r#"{"tokens": ["Hello", {"text": " world", "finish_reason": "stop"}]}"#,
        )
        .unwrap();
        let backend = ReplayBackend::from_transcript(transcript);
        assert_eq!(backend.tokens()[0], Token::text("Hello"));
        assert_eq!(
            backend.tokens()[1],
            Token::finished(" world", FinishReason::Stop)
        );
    }

    #[tokio::test]
    async fn replay_ends_with_usage() {
        let backend = ReplayBackend::new(
            vec![Token::text("a"), Token::text("b")],
            RawUsage {
                prefill_count: 3,
                decode_count: 2,
                ..Default::default()
            },
        );
        let request: ChatCompletionRequest =
            serde_json::from_str(r#"{"messages": [], "model": "m"}"#).unwrap();
        let items: Vec<_> = backend.inference(&request, "req").collect().await;
        assert_eq!(items.len(), 3);
        match items.last() {
            Some(Ok(StreamItem::Usage(usage))) => assert_eq!(usage.prefill_count, 3),
            other => panic!("expected usage last, got {:?}", other),
        }
    }
}
