//! Cross-cutting tools that reach into the session registry and cron
//! store: sub-agent spawning, cross-session messaging, and job management.
//!
//! These hold `Weak` handles — the registry owns the tool registry through
//! the runtime handle, so strong references here would cycle.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use sb_domain::error::{Error, Result};
use sb_sessions::session_key;
use sb_tools::{Tool, ToolContext};

use crate::cron::{CronJob, CronStore, PayloadType};

use super::agent_loop::RunOptions;
use super::registry::SessionRegistry;

fn registry_of(weak: &Weak<SessionRegistry>) -> Result<Arc<SessionRegistry>> {
    weak.upgrade()
        .ok_or_else(|| Error::NotReady("session registry is shutting down".into()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// sessions_send
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct SendParams {
    session_key: String,
    message: String,
}

/// Send a message into another session and wait for its reply.
pub struct SessionsSendTool {
    registry: Weak<SessionRegistry>,
    wait_timeout: Duration,
}

impl SessionsSendTool {
    pub fn new(registry: Weak<SessionRegistry>, wait_timeout: Duration) -> Self {
        Self {
            registry,
            wait_timeout,
        }
    }
}

#[async_trait::async_trait]
impl Tool for SessionsSendTool {
    fn name(&self) -> &str {
        "sessions_send"
    }

    fn description(&self) -> &str {
        "Send a message to another session and return that session's reply."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "session_key": { "type": "string", "description": "Target session key, e.g. 'telegram:42'" },
                "message": { "type": "string", "description": "Message to deliver" }
            },
            "required": ["session_key", "message"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let req: SendParams =
            serde_json::from_value(params).map_err(|e| Error::parse("tool_args", e))?;

        // Sending to the own session would deadlock behind this very run.
        if req.session_key == ctx.session_key {
            return Err(Error::Other(
                "cannot send to the session this run belongs to".into(),
            ));
        }

        let registry = registry_of(&self.registry)?;
        let reply = registry
            .send_message(
                &req.session_key,
                session_key::channel_of(&req.session_key),
                &req.message,
                RunOptions::default(),
                Some(self.wait_timeout),
            )
            .await?;

        Ok(json!({"session_key": req.session_key, "reply": reply}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// sessions_spawn
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct SpawnParams {
    task: String,
    #[serde(default)]
    model: Option<String>,
}

/// Run a task in a fresh isolated child session and return its answer.
/// The child has its own loop and its own iteration cap.
pub struct SessionsSpawnTool {
    registry: Weak<SessionRegistry>,
}

impl SessionsSpawnTool {
    pub fn new(registry: Weak<SessionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait::async_trait]
impl Tool for SessionsSpawnTool {
    fn name(&self) -> &str {
        "sessions_spawn"
    }

    fn description(&self) -> &str {
        "Delegate a task to a fresh sub-agent session and return its final answer."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "task": { "type": "string", "description": "The task to hand off" },
                "model": { "type": "string", "description": "Optional 'provider/model' override" }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let req: SpawnParams =
            serde_json::from_value(params).map_err(|e| Error::parse("tool_args", e))?;
        let registry = registry_of(&self.registry)?;

        let child_key = format!("spawn:{}:{}", ctx.session_key, uuid::Uuid::new_v4());
        let opts = RunOptions {
            model: req.model,
            ..Default::default()
        };
        let answer = registry
            .send_message(&child_key, None, &req.task, opts, None)
            .await;

        // One-shot child: archive whatever happened.
        registry.archive_session(&child_key);

        let answer = answer?;
        Ok(json!({"session_key": child_key, "answer": answer}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// cron
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct CronParams {
    action: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    schedule: Option<String>,
    #[serde(default)]
    command: Option<String>,
    /// `system_event` (default) or `agent_turn`.
    #[serde(default)]
    payload: Option<String>,
    #[serde(default)]
    keep_history: bool,
}

/// Manage scheduled jobs from inside a conversation.
pub struct CronTool {
    store: Arc<CronStore>,
}

impl CronTool {
    pub fn new(store: Arc<CronStore>) -> Self {
        Self { store }
    }
}

fn required<'a>(field: &'a Option<String>, name: &str) -> Result<&'a str> {
    field
        .as_deref()
        .ok_or_else(|| Error::parse("tool_args", format!("missing '{name}'")))
}

#[async_trait::async_trait]
impl Tool for CronTool {
    fn name(&self) -> &str {
        "cron"
    }

    fn description(&self) -> &str {
        "Create, list, or delete scheduled jobs (5-field cron expressions)."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["create", "list", "delete"],
                    "description": "Operation to perform"
                },
                "name": { "type": "string", "description": "Job name (create, delete)" },
                "schedule": { "type": "string", "description": "5-field cron expression (create)" },
                "command": { "type": "string", "description": "Command text the job sends (create)" },
                "payload": {
                    "type": "string",
                    "enum": ["system_event", "agent_turn"],
                    "description": "Run inside this session's context or in isolation"
                },
                "keep_history": { "type": "boolean", "description": "Keep the isolated session after each run" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let req: CronParams =
            serde_json::from_value(params).map_err(|e| Error::parse("tool_args", e))?;

        match req.action.as_str() {
            "create" => {
                let payload = match req.payload.as_deref() {
                    None | Some("system_event") => PayloadType::SystemEvent,
                    Some("agent_turn") => PayloadType::AgentTurn,
                    Some(other) => {
                        return Err(Error::parse(
                            "tool_args",
                            format!("unknown payload '{other}'"),
                        ));
                    }
                };

                let mut job = CronJob::new(
                    required(&req.name, "name")?,
                    required(&req.schedule, "schedule")?,
                    required(&req.command, "command")?,
                    payload,
                );
                job.agent_id = ctx.agent_id.clone();
                if payload == PayloadType::SystemEvent {
                    job.session_key = Some(ctx.session_key.clone());
                }
                if req.keep_history {
                    job.cleanup = crate::cron::CleanupPolicy::Keep;
                }
                // Results land back in the creating conversation unless a
                // notification channel covers it.
                job.result_session_key = Some(ctx.session_key.clone());
                job.origin_channel = ctx.channel.clone();
                job.origin_target =
                    session_key::peer_of(&ctx.session_key).map(str::to_owned);

                let job = self.store.add(job)?;
                Ok(json!({
                    "created": job.name,
                    "id": job.id,
                    "next_run_at": job.next_run_at,
                }))
            }

            "list" => {
                let jobs: Vec<Value> = self
                    .store
                    .list()
                    .into_iter()
                    .map(|j| {
                        json!({
                            "id": j.id,
                            "name": j.name,
                            "schedule": j.schedule,
                            "payload": j.payload,
                            "enabled": j.enabled,
                            "run_count": j.run_count,
                            "next_run_at": j.next_run_at,
                        })
                    })
                    .collect();
                Ok(json!({"count": jobs.len(), "jobs": jobs}))
            }

            "delete" => {
                let name = required(&req.name, "name")?;
                match self.store.get_by_name(name) {
                    Some(job) => {
                        self.store.remove(&job.id);
                        Ok(json!({"deleted": name}))
                    }
                    None => Err(Error::Other(format!("no cron job named '{name}'"))),
                }
            }

            other => Err(Error::parse(
                "tool_args",
                format!("unknown action '{other}'"),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cron_tool_create_and_list_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CronStore::open(dir.path(), "UTC").unwrap());
        let tool = CronTool::new(store.clone());
        let ctx = ToolContext {
            session_key: "telegram:42".into(),
            channel: Some("telegram".into()),
            ..Default::default()
        };

        let created = tool
            .execute(
                json!({
                    "action": "create",
                    "name": "daily-status",
                    "schedule": "0 9 * * *",
                    "command": "status",
                }),
                &ctx,
            )
            .await
            .unwrap();
        assert_eq!(created["created"], "daily-status");

        let job = store.get_by_name("daily-status").unwrap();
        assert_eq!(job.payload, PayloadType::SystemEvent);
        assert_eq!(job.session_key.as_deref(), Some("telegram:42"));
        assert_eq!(job.origin_channel.as_deref(), Some("telegram"));
        assert_eq!(job.origin_target.as_deref(), Some("42"));

        let listed = tool
            .execute(json!({"action": "list"}), &ctx)
            .await
            .unwrap();
        assert_eq!(listed["count"], 1);
    }

    #[tokio::test]
    async fn cron_tool_rejects_bad_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CronStore::open(dir.path(), "UTC").unwrap());
        let tool = CronTool::new(store);
        let err = tool
            .execute(
                json!({"action": "create", "name": "x", "schedule": "nope", "command": "c"}),
                &ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[tokio::test]
    async fn cron_tool_delete_unknown_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CronStore::open(dir.path(), "UTC").unwrap());
        let tool = CronTool::new(store);
        let err = tool
            .execute(
                json!({"action": "delete", "name": "ghost"}),
                &ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn sessions_send_refuses_own_session() {
        // A dropped registry is enough: the self-send check fires first.
        let tool = SessionsSendTool::new(Weak::new(), Duration::from_secs(1));
        let ctx = ToolContext {
            session_key: "telegram:42".into(),
            ..Default::default()
        };
        let err = tool
            .execute(
                json!({"session_key": "telegram:42", "message": "hi"}),
                &ctx,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("own"));
    }

    #[tokio::test]
    async fn dead_registry_is_not_ready() {
        let tool = SessionsSpawnTool::new(Weak::new());
        let err = tool
            .execute(json!({"task": "do a thing"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotReady(_)));
    }
}
