// src/server/server.rs
use super::aggregate::collect_completion;
use super::emitter::{chunk_stream, ChunkEmitter};
use super::logger::ChatCompletionLogger;
use super::parser::StreamToolParser;
use super::streaming::{ChatResponse, Streamer};
use super::{
    ChatCompletionRequest, ChatResponder, ModelCard, ModelList, ServerData, StreamError,
};
use axum::{
    extract::{Json, State},
    response::{sse::KeepAlive, Sse},
    routing::{get, post},
    Router,
};
use futures::StreamExt;
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

pub fn keep_alive_interval() -> Duration {
    Duration::from_millis(
        env::var("KEEP_ALIVE_INTERVAL")
            .map(|val| val.parse::<u64>().unwrap_or(100))
            .unwrap_or(100),
    )
}

pub fn new_request_id() -> String {
    format!("chatcmpl-{}", &Uuid::new_v4().simple().to_string()[..16])
}

pub async fn chat_completion(
    State(data): State<Arc<ServerData>>,
    Json(request): Json<ChatCompletionRequest>,
) -> ChatResponder {
    if request.messages.is_empty() {
        return ChatResponder::ValidationError("`messages` must not be empty".to_string());
    }

    let request_id = new_request_id();
    let logger = ChatCompletionLogger::new(&request_id);
    if let Some(logger) = &logger {
        logger.log_request(&request);
    }
    crate::log_info!(
        "[{}] New {} request with {} message(s), {} tool(s)",
        request_id,
        if request.stream { "stream" } else { "completion" },
        request.messages.len(),
        request.tools.as_ref().map_or(0, |t| t.len())
    );

    let parser = StreamToolParser::new(data.parser_config.clone()).with_logger(logger.clone());
    let tokens = data.backend.inference(&request, &request_id);

    if request.stream {
        let (response_tx, client_rx) = flume::unbounded();
        let (disconnect_tx, mut disconnect_rx) = watch::channel(false);
        let emitter = ChunkEmitter::new(
            request_id.clone(),
            data.model_name.clone(),
            data.stream_options,
        );
        let mut chunks = chunk_stream(tokens, parser, emitter, logger.clone());

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = disconnect_rx.changed() => {
                        crate::log_warn!("[{}] {}", request_id, StreamError::Cancelled);
                        if let Some(logger) = &logger {
                            logger.log_error(&StreamError::Cancelled.to_string());
                        }
                        // Dropping `chunks` cancels the backend stream.
                        return;
                    }
                    next = chunks.next() => match next {
                        Some(Ok(chunk)) => {
                            if response_tx.send(ChatResponse::Chunk(chunk)).is_err() {
                                crate::log_warn!("[{}] {}", request_id, StreamError::Cancelled);
                                return;
                            }
                        }
                        Some(Err(e)) => {
                            let _ = response_tx.send(ChatResponse::InternalError(e.to_string()));
                            break;
                        }
                        None => break,
                    }
                }
            }
            let _ = response_tx.send(ChatResponse::Done);
        });

        ChatResponder::Streamer(
            Sse::new(Streamer::new(client_rx, Some(disconnect_tx))).keep_alive(
                KeepAlive::new()
                    .interval(keep_alive_interval())
                    .text("keep-alive-text"),
            ),
        )
    } else {
        match collect_completion(tokens, parser, &request_id, &data.model_name, logger).await {
            Ok(response) => ChatResponder::Completion(response),
            Err(e) => {
                crate::log_error!("[{}] Completion failed: {}", request_id, e);
                ChatResponder::InternalError(format!("Internal server error: {}", e))
            }
        }
    }
}

pub async fn list_models(State(data): State<Arc<ServerData>>) -> ChatResponder {
    ChatResponder::Models(ModelList {
        object: "list",
        data: vec![ModelCard {
            id: data.model_name.clone(),
            name: data.model_name.clone(),
        }],
    })
}

pub fn router(data: Arc<ServerData>) -> Router {
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);

    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completion))
        .layer(cors)
        .with_state(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::ReplayBackend;
    use crate::core::{RawUsage, Token};
    use crate::server::ChatMessage;
    use crate::utils::config::{ParserConfig, StreamOptions};

    fn server_data(tokens: Vec<Token>) -> Arc<ServerData> {
        Arc::new(ServerData {
            backend: Arc::new(ReplayBackend::new(
                tokens,
                RawUsage {
                    prefill_count: 2,
                    decode_count: 2,
                    ..Default::default()
                },
            )),
            model_name: "replay".to_string(),
            parser_config: ParserConfig::default(),
            stream_options: StreamOptions::default(),
            api_key: Some("sk-test".to_string()),
        })
    }

    fn request(stream: bool, messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            messages,
            model: "replay".to_string(),
            stream,
            temperature: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            tools: None,
            tool_choice: None,
            stream_options: None,
        }
    }

    fn user(content: &str) -> ChatMessage {
        ChatMessage {
            role: "user".to_string(),
            content: Some(content.to_string()),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    #[tokio::test]
    async fn completion_request_aggregates() {
        let data = server_data(vec![Token::text("Hi"), Token::text(" there")]);
        let responder =
            chat_completion(State(data), Json(request(false, vec![user("hello")]))).await;
        match responder {
            ChatResponder::Completion(response) => {
                assert_eq!(response.model, "replay");
                assert_eq!(
                    response.choices[0].message.content.as_deref(),
                    Some("Hi there")
                );
                assert_eq!(response.usage.total_tokens, 4);
            }
            _ => panic!("expected a completion"),
        }
    }

    #[tokio::test]
    async fn configured_api_key_is_not_enforced_here() {
        let data = server_data(vec![Token::text("ok")]);
        assert_eq!(data.api_key.as_deref(), Some("sk-test"));
        let responder =
            chat_completion(State(data), Json(request(false, vec![user("hello")]))).await;
        assert!(matches!(responder, ChatResponder::Completion(_)));
    }

    #[tokio::test]
    async fn empty_messages_rejected() {
        let data = server_data(vec![]);
        let responder = chat_completion(State(data), Json(request(false, vec![]))).await;
        assert!(matches!(responder, ChatResponder::ValidationError(_)));
    }

    #[tokio::test]
    async fn models_lists_configured_name() {
        match list_models(State(server_data(vec![]))).await {
            ChatResponder::Models(list) => assert_eq!(list.data[0].id, "replay"),
            _ => panic!("expected a model list"),
        }
    }

    #[test]
    fn request_ids_are_prefixed() {
        let id = new_request_id();
        assert!(id.starts_with("chatcmpl-"));
        assert_eq!(id.len(), "chatcmpl-".len() + 16);
    }
}
