//! SSE plumbing shared by the streaming endpoints.
//!
//! Every stream emits `data: <json>` frames and terminates with
//! `data: [DONE]`. The `X-Accel-Buffering: no` header keeps reverse
//! proxies from buffering the stream.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::Stream;
use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;

use lifequery_core::{IngestCounts, PipelineEvent};

pub type SseEvent = Result<Event, Infallible>;

/// Wrap an event stream into an SSE response with proxy buffering off.
pub fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = SseEvent> + Send + 'static,
{
    let mut response = Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response();
    response.headers_mut().insert(
        "X-Accel-Buffering",
        axum::http::HeaderValue::from_static("no"),
    );
    response
}

/// One JSON data frame.
pub fn json_event<T: Serialize>(payload: &T) -> SseEvent {
    let data = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_string());
    Ok(Event::default().data(data))
}

/// The terminal `[DONE]` frame.
pub fn done_marker() -> SseEvent {
    Ok(Event::default().data("[DONE]"))
}

/// Terminal event payload for an ingest operation.
pub fn done_payload(counts: &IngestCounts) -> serde_json::Value {
    json!({
        "type": "done",
        "messages_added": counts.messages_added,
        "inserted": counts.messages_added,
        "skipped_duplicate": counts.skipped_duplicate,
        "skipped_empty": counts.skipped_empty,
        "chunks_created": counts.chunks_created,
        "chunks_embedded": counts.chunks_embedded,
        "cancelled": counts.cancelled,
    })
}

/// Error event payload.
pub fn error_payload(message: &str) -> serde_json::Value {
    json!({ "type": "error", "message": message })
}

/// Turn a pipeline progress receiver into the SSE frame stream, ending
/// with `[DONE]` once the sender side closes.
pub fn pipeline_stream(
    rx: mpsc::Receiver<PipelineEvent>,
) -> impl Stream<Item = SseEvent> + Send {
    futures::stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        match rx.recv().await {
            Some(PipelineEvent::Done(counts)) => {
                Some((json_event(&done_payload(&counts)), Some(rx)))
            }
            Some(PipelineEvent::Error { message }) => {
                Some((json_event(&error_payload(&message)), Some(rx)))
            }
            Some(event) => Some((json_event(&event), Some(rx))),
            None => Some((done_marker(), None)),
        }
    })
}

/// Turn a raw JSON value receiver into the SSE frame stream, ending with
/// `[DONE]` once the sender side closes.
pub fn value_stream(
    rx: mpsc::Receiver<serde_json::Value>,
) -> impl Stream<Item = SseEvent> + Send {
    futures::stream::unfold(Some(rx), |state| async move {
        let mut rx = state?;
        match rx.recv().await {
            Some(value) => Some((json_event(&value), Some(rx))),
            None => Some((done_marker(), None)),
        }
    })
}
