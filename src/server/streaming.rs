use super::ChatCompletionChunk;
use axum::response::sse::Event;
use flume::Receiver;
use futures::stream::{BoxStream, StreamExt};
use futures::Stream;
use std::{
    pin::Pin,
    task::{Context, Poll},
};
use tokio::sync::watch;

#[derive(Debug, PartialEq)]
pub enum StreamingStatus {
    Uninitialized,
    Started,
    Interrupted,
    Stopped,
}

pub enum ChatResponse {
    InternalError(String),
    Chunk(ChatCompletionChunk),
    Done, //finish flag
}

/// SSE body fed by the generation task through a channel.
///
/// Dropping it before `Done` (client went away) signals `disconnect_tx` so the
/// task stops pulling from the backend.
pub struct Streamer {
    rx: BoxStream<'static, ChatResponse>,
    status: StreamingStatus,
    disconnect_tx: Option<watch::Sender<bool>>,
}

impl Streamer {
    pub fn new(rx: Receiver<ChatResponse>, disconnect_tx: Option<watch::Sender<bool>>) -> Self {
        Self {
            rx: rx.into_stream().boxed(),
            status: StreamingStatus::Uninitialized,
            disconnect_tx,
        }
    }

    pub fn status(&self) -> &StreamingStatus {
        &self.status
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        if self.status != StreamingStatus::Stopped {
            if let Some(tx) = self.disconnect_tx.as_ref() {
                let _ = tx.send(true);
            }
        }
    }
}

impl Stream for Streamer {
    type Item = Result<Event, axum::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.status == StreamingStatus::Stopped {
            return Poll::Ready(None);
        }
        match self.rx.poll_next_unpin(cx) {
            Poll::Ready(Some(resp)) => match resp {
                ChatResponse::InternalError(e) => {
                    let body = serde_json::json!({ "error": { "message": e } });
                    Poll::Ready(Some(Ok(Event::default().data(body.to_string()))))
                }
                ChatResponse::Chunk(response) => {
                    if self.status != StreamingStatus::Started {
                        self.status = StreamingStatus::Started;
                    }
                    Poll::Ready(Some(Event::default().json_data(response)))
                }
                ChatResponse::Done => {
                    self.status = StreamingStatus::Stopped;
                    Poll::Ready(Some(Ok(Event::default().data("[DONE]"))))
                }
            },
            // Sender dropped without `Done`.
            Poll::Ready(None) => {
                self.status = StreamingStatus::Interrupted;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
