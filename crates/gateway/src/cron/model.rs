//! Cron data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Enums
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// How a job reaches the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadType {
    /// Inject the command into an existing (or temporary) session.
    SystemEvent,
    /// Run in a fresh isolated `cron:<jobId>:<runId>` session.
    AgentTurn,
}

/// What happens to an `agent_turn` job's session after the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CleanupPolicy {
    /// Destroy the session and its persisted rows.
    #[default]
    Delete,
    /// Archive the session, keeping its history.
    Keep,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Completed,
    Failed,
    Timeout,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Job
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A notification destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotifyTarget {
    pub channel: String,
    pub target: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJob {
    pub id: Uuid,
    /// Unique human name.
    pub name: String,
    /// 5-field cron expression.
    pub schedule: String,
    /// The text sent into the agent loop on each run.
    pub command: String,
    pub payload: PayloadType,
    /// Explicit target session for `system_event` jobs.
    #[serde(default)]
    pub session_key: Option<String>,
    /// Session whose history receives each run's result.
    #[serde(default)]
    pub result_session_key: Option<String>,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub cleanup: CleanupPolicy,
    #[serde(default = "d_timeout_seconds")]
    pub timeout_seconds: u64,
    /// Explicit notification list; merged with auto-notify.
    #[serde(default)]
    pub notify: Vec<NotifyTarget>,
    #[serde(default = "d_true")]
    pub enabled: bool,
    #[serde(default)]
    pub run_count: u64,
    /// Channel/peer of the session the job was created from; drives
    /// auto-notify when that channel is push-capable.
    #[serde(default)]
    pub origin_channel: Option<String>,
    #[serde(default)]
    pub origin_target: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_run_at: Option<DateTime<Utc>>,
}

fn d_timeout_seconds() -> u64 {
    300
}

fn d_true() -> bool {
    true
}

impl CronJob {
    pub fn new(name: &str, schedule: &str, command: &str, payload: PayloadType) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_owned(),
            schedule: schedule.to_owned(),
            command: command.to_owned(),
            payload,
            session_key: None,
            result_session_key: None,
            agent_id: None,
            cleanup: CleanupPolicy::default(),
            timeout_seconds: d_timeout_seconds(),
            notify: Vec::new(),
            enabled: true,
            run_count: 0,
            origin_channel: None,
            origin_target: None,
            created_at: Utc::now(),
            last_run_at: None,
            next_run_at: None,
        }
    }

    /// The effective notification list: auto-notify from the creating
    /// session's channel (when push-capable) merged with the explicit
    /// list, deduplicated by `(channel, target)`.
    pub fn effective_notify(&self, push_capable: impl Fn(&str) -> bool) -> Vec<NotifyTarget> {
        let mut seen = std::collections::HashSet::new();
        let mut targets = Vec::new();

        if let (Some(channel), Some(target)) = (&self.origin_channel, &self.origin_target) {
            if push_capable(channel) {
                let auto = NotifyTarget {
                    channel: channel.clone(),
                    target: target.clone(),
                };
                if seen.insert((auto.channel.clone(), auto.target.clone())) {
                    targets.push(auto);
                }
            }
        }
        for explicit in &self.notify {
            if seen.insert((explicit.channel.clone(), explicit.target.clone())) {
                targets.push(explicit.clone());
            }
        }
        targets
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Run record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronRun {
    pub id: Uuid,
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunOutcome,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl CronRun {
    pub fn start(job_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            started_at: Utc::now(),
            finished_at: None,
            status: RunOutcome::Running,
            output: None,
            error: None,
        }
    }

    pub fn finish(mut self, status: RunOutcome, output: Option<String>, error: Option<String>) -> Self {
        self.finished_at = Some(Utc::now());
        self.status = status;
        self.output = output;
        self.error = error;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job_with_origin() -> CronJob {
        let mut job = CronJob::new("daily", "0 9 * * *", "status", PayloadType::SystemEvent);
        job.origin_channel = Some("telegram".into());
        job.origin_target = Some("42".into());
        job
    }

    #[test]
    fn auto_notify_requires_push_capable_channel() {
        let job = job_with_origin();
        let targets = job.effective_notify(|_| true);
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].channel, "telegram");
        assert_eq!(targets[0].target, "42");

        let none = job.effective_notify(|_| false);
        assert!(none.is_empty());
    }

    #[test]
    fn explicit_targets_are_merged_and_deduplicated() {
        let mut job = job_with_origin();
        job.notify = vec![
            NotifyTarget {
                channel: "telegram".into(),
                target: "42".into(), // duplicate of auto
            },
            NotifyTarget {
                channel: "discord".into(),
                target: "ops".into(),
            },
        ];
        let targets = job.effective_notify(|_| true);
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].channel, "discord");
    }

    #[test]
    fn run_record_finish_sets_terminal_fields() {
        let run = CronRun::start(Uuid::new_v4());
        assert_eq!(run.status, RunOutcome::Running);
        let done = run.finish(RunOutcome::Completed, Some("ok".into()), None);
        assert!(done.finished_at.is_some());
        assert_eq!(done.status, RunOutcome::Completed);
        assert_eq!(done.output.as_deref(), Some("ok"));
    }

    #[test]
    fn job_serde_defaults() {
        let json = serde_json::json!({
            "id": Uuid::new_v4(),
            "name": "j",
            "schedule": "0 * * * *",
            "command": "do it",
            "payload": "agent_turn",
            "created_at": "2026-01-01T00:00:00Z",
        });
        let job: CronJob = serde_json::from_value(json).unwrap();
        assert!(job.enabled);
        assert_eq!(job.timeout_seconds, 300);
        assert_eq!(job.cleanup, CleanupPolicy::Delete);
        assert!(job.notify.is_empty());
    }
}
