use anyhow::Result;
use clap::Parser;
use futures::StreamExt;
use std::sync::Arc;
use tool_stream::core::backend::ReplayBackend;
use tool_stream::core::Backend;
use tool_stream::server::aggregate::collect_completion;
use tool_stream::server::emitter::{chunk_stream, ChunkEmitter};
use tool_stream::server::parser::StreamToolParser;
use tool_stream::server::server::{new_request_id, router};
use tool_stream::server::{Args, ChatCompletionRequest, ChatMessage, ServerData};
use tool_stream::utils::config::{ParserConfig, StreamOptions};
use tracing_subscriber::EnvFilter;

fn replay_request(args: &Args) -> ChatCompletionRequest {
    ChatCompletionRequest {
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: Some(format!("replay {}", args.transcript)),
            name: None,
            tool_calls: None,
            tool_call_id: None,
        }],
        model: args.model_name.clone(),
        stream: args.stream,
        temperature: None,
        top_p: None,
        frequency_penalty: None,
        presence_penalty: None,
        tools: None,
        tool_choice: None,
        stream_options: None,
    }
}

async fn replay(args: &Args, backend: ReplayBackend, config: ParserConfig) -> Result<()> {
    let request = replay_request(args);
    let request_id = new_request_id();
    let tokens = backend.inference(&request, &request_id);
    let parser = StreamToolParser::new(config);

    if args.stream {
        let options = StreamOptions {
            continue_after_tool_call: args.continue_after_tool_call,
        };
        let emitter = ChunkEmitter::new(request_id, args.model_name.clone(), options);
        let mut chunks = chunk_stream(tokens, parser, emitter, None);
        while let Some(chunk) = chunks.next().await {
            println!("data: {}\n", serde_json::to_string(&chunk?)?);
        }
        println!("data: [DONE]\n");
    } else {
        let response =
            collect_completion(tokens, parser, &request_id, &args.model_name, None).await?;
        println!("{}", serde_json::to_string_pretty(&response)?);
    }
    Ok(())
}

async fn serve(args: &Args, backend: ReplayBackend, config: ParserConfig) -> Result<()> {
    let data = Arc::new(ServerData {
        backend: Arc::new(backend),
        model_name: args.model_name.clone(),
        parser_config: config,
        stream_options: StreamOptions {
            continue_after_tool_call: args.continue_after_tool_call,
        },
        api_key: args.api_key.clone(),
    });
    if data.api_key.is_some() {
        tool_stream::log_info!("API key configured; enforcement is left to the auth layer");
    }
    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tool_stream::log_warn!("Chat server listening on http://{}/v1/", addr);

    axum::serve(listener, router(data))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tool_stream::log_warn!("Received CTRL+C, shutting down server...");
        })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let config = ParserConfig::default().with_max_capture_bytes(args.max_capture_bytes)?;
    let backend = ReplayBackend::from_file(&args.transcript)?;

    if args.server {
        serve(&args, backend, config).await
    } else {
        replay(&args, backend, config).await
    }
}
