//! Inbound message ingress: route a channel message to its session.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use sb_sessions::session_key;

use crate::runtime::RunOptions;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InboundRequest {
    pub channel: String,
    pub peer: String,
    pub text: String,
    #[serde(default)]
    pub model: Option<String>,
    /// When true, return immediately; the reply streams on the bus topic.
    #[serde(default)]
    pub r#async: bool,
}

pub async fn handle_inbound(
    State(state): State<AppState>,
    Json(req): Json<InboundRequest>,
) -> (StatusCode, Json<Value>) {
    let key = session_key::for_channel(&req.channel, &req.peer);
    let opts = RunOptions {
        model: req.model,
        deliver_segments: true,
        ..Default::default()
    };

    if req.r#async {
        return match state
            .registry
            .send_message_async(&key, Some(&req.channel), &req.text, opts)
        {
            Ok(()) => (
                StatusCode::ACCEPTED,
                Json(json!({"session_key": key, "accepted": true})),
            ),
            Err(e) => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": e.to_string()})),
            ),
        };
    }

    match state
        .registry
        .send_message(&key, Some(&req.channel), &req.text, opts, None)
        .await
    {
        Ok(reply) => (
            StatusCode::OK,
            Json(json!({"session_key": key, "reply": reply})),
        ),
        Err(e) => (
            StatusCode::BAD_GATEWAY,
            Json(json!({"session_key": key, "error": e.to_string()})),
        ),
    }
}
