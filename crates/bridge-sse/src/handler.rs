//! HTTP handlers: SSE subscription, request forwarding and health.

use crate::server::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use bridge_core::config::HttpDefaults;
use bridge_core::Subscription;
use futures::stream::{self, Stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, warn};

/// `GET <path>`: subscribe and stream backend output as SSE.
///
/// The stream opens with a comment (so proxies flush headers) and a
/// `messageEndpoint` event naming where to POST requests. Each backend line
/// then becomes one `message` event.
pub async fn handle_sse(State(state): State<Arc<AppState>>) -> Response {
    let subscription = match state.backend.subscribe() {
        Ok(sub) => sub,
        Err(e) => {
            warn!("Refusing SSE client: {}", e);
            return (StatusCode::BAD_GATEWAY, e.to_string()).into_response();
        }
    };
    debug!("SSE client connected as subscriber {}", subscription.id());

    let shutdown = state.backend.broadcaster().shutdown_signal();
    let events = event_stream(subscription, shutdown, state.message_path.clone());
    let sse = Sse::new(events)
        .keep_alive(KeepAlive::new().interval(HttpDefaults::KEEP_ALIVE_INTERVAL));

    ([("x-accel-buffering", "no")], sse).into_response()
}

/// `POST <path>`: forward the body to the backend verbatim.
pub async fn handle_write(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    match state.backend.write(&body).await {
        Ok(()) => StatusCode::NO_CONTENT,
        Err(e) => {
            warn!("Forwarding {} byte request failed: {}", body.len(), e);
            StatusCode::BAD_GATEWAY
        }
    }
}

/// `GET /health`: liveness of the backend behind this server.
pub async fn handle_health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let backend = &state.backend;
    let (code, status) = if backend.is_closed() {
        (StatusCode::SERVICE_UNAVAILABLE, "backend_closed")
    } else {
        (StatusCode::OK, "ok")
    };
    (
        code,
        Json(json!({
            "status": status,
            "subscribers": backend.subscriber_count(),
            "pid": backend.pid(),
        })),
    )
}

struct StreamState {
    subscription: Subscription,
    shutdown: watch::Receiver<bool>,
    backend_closed: bool,
}

fn event_stream(
    subscription: Subscription,
    shutdown: watch::Receiver<bool>,
    message_path: String,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let preamble = stream::iter([
        Ok(Event::default().comment("")),
        Ok(Event::default().event("messageEndpoint").data(message_path)),
    ]);

    let state = StreamState {
        subscription,
        shutdown,
        backend_closed: false,
    };
    let messages = stream::unfold(state, |mut state| async move {
        loop {
            let next = if state.backend_closed {
                // Queue is closed: drain what was buffered, then end.
                state.subscription.recv().await
            } else {
                tokio::select! {
                    biased;
                    line = state.subscription.recv() => line,
                    changed = state.shutdown.changed() => {
                        if changed.is_err() || *state.shutdown.borrow_and_update() {
                            state.backend_closed = true;
                        }
                        continue;
                    }
                }
            };

            return match next {
                Some(line) => Some((Ok(message_event(&line)), state)),
                None => {
                    debug!("SSE stream for subscriber {} ended", state.subscription.id());
                    None
                }
            };
        }
    });

    preamble.chain(messages)
}

/// Wrap one backend line as an SSE `message` event.
pub fn message_event(line: &[u8]) -> Event {
    Event::default().event("message").data(sse_data(line))
}

/// Event payload for a backend line: trailing line break removed, one
/// sub-line per `data:` field. Carriage returns cannot appear in SSE data
/// and are dropped.
pub fn sse_data(line: &[u8]) -> String {
    let text = String::from_utf8_lossy(line);
    let text = text.trim_end_matches(['\r', '\n']);
    text.split('\n')
        .map(|part| part.replace('\r', ""))
        .collect::<Vec<_>>()
        .join("\n")
}
