//! Thin ingress API — the surface external front-ends call.
//!
//! JSON in/out only; no rendering, no authentication. Streaming consumers
//! attach to a session's bus topic over SSE.

mod inbound;
mod jobs;
mod sessions;

use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/inbound", post(inbound::handle_inbound))
        .route("/v1/sessions", get(sessions::list_sessions))
        .route("/v1/sessions/:key/messages", post(sessions::send_message))
        .route("/v1/sessions/:key/stop", post(sessions::stop_run))
        .route("/v1/sessions/:key/events", get(sessions::stream_events))
        .route("/v1/sessions/:key", delete(sessions::delete_session))
        .route(
            "/v1/cron/jobs",
            get(jobs::list_jobs).post(jobs::create_job),
        )
        .route("/v1/cron/jobs/:id", delete(jobs::delete_job))
        .route("/v1/cron/jobs/:id/runs", get(jobs::list_runs))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({"ok": true}))
}
