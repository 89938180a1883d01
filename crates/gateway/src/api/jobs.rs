//! Cron job CRUD.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::cron::{CleanupPolicy, CronJob, NotifyTarget, PayloadType};
use crate::state::AppState;

pub async fn list_jobs(State(state): State<AppState>) -> Json<Value> {
    let jobs = state.cron.list();
    Json(json!({"count": jobs.len(), "jobs": jobs}))
}

#[derive(Debug, Deserialize)]
pub struct CreateJobRequest {
    pub name: String,
    pub schedule: String,
    pub command: String,
    pub payload: PayloadType,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub result_session_key: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub cleanup: Option<CleanupPolicy>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub notify: Vec<NotifyTarget>,
}

pub async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> (StatusCode, Json<Value>) {
    let mut job = CronJob::new(&req.name, &req.schedule, &req.command, req.payload);
    job.session_key = req.session_key;
    job.result_session_key = req.result_session_key;
    job.agent_id = req.agent_id;
    if let Some(cleanup) = req.cleanup {
        job.cleanup = cleanup;
    }
    if let Some(timeout) = req.timeout_seconds {
        job.timeout_seconds = timeout;
    }
    job.notify = req.notify;

    match state.cron.add(job) {
        Ok(job) => (StatusCode::CREATED, Json(json!({"job": job}))),
        Err(e) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({"error": e.to_string()})),
        ),
    }
}

pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> (StatusCode, Json<Value>) {
    match state.cron.remove(&id) {
        Some(job) => (StatusCode::OK, Json(json!({"deleted": job.name}))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": format!("no cron job '{id}'")})),
        ),
    }
}

pub async fn list_runs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<Value> {
    let runs = state.cron.runs_for(&id);
    Json(json!({"count": runs.len(), "runs": runs}))
}
