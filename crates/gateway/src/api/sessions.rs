//! Session endpoints: listing, synchronous turns, cancellation, deletion,
//! and SSE re-publication of a session's bus topic.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures_core::Stream;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::bus::agent_topic;
use crate::runtime::RunOptions;
use crate::state::AppState;

pub async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions = state.runtime.sessions.list();
    Json(json!({
        "count": sessions.len(),
        "live_workers": state.registry.live_count(),
        "sessions": sessions,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
    /// Run deadline override in seconds.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub async fn send_message(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> (StatusCode, Json<Value>) {
    let opts = RunOptions {
        model: req.model,
        timeout: req.timeout_secs.map(std::time::Duration::from_secs),
        ..Default::default()
    };
    match state
        .registry
        .send_message(&key, None, &req.text, opts, None)
        .await
    {
        Ok(reply) => (StatusCode::OK, Json(json!({"reply": reply}))),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"error": e.to_string()})),
        ),
    }
}

pub async fn stop_run(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Json<Value> {
    let stopped = state.registry.stop_run(&key);
    Json(json!({"stopped": stopped}))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> (StatusCode, Json<Value>) {
    if state.registry.delete_session(&key) {
        (StatusCode::OK, Json(json!({"deleted": key})))
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no session '{key}'")})),
        )
    }
}

/// SSE view of `agent:<session_key>`. Lossy by design: a slow consumer
/// skips ahead rather than stalling the bus.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.runtime.bus.subscribe(&agent_topic(&key));

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let payload = serde_json::to_string(&event)
                        .unwrap_or_else(|_| "{}".into());
                    yield Ok(Event::default().data(payload));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    yield Ok(Event::default()
                        .event("lagged")
                        .data(skipped.to_string()));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
