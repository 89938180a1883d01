//! Cron runner — fires due jobs into the session/loop machinery.
//!
//! Each tick evaluates due jobs and spawns one execution per job, guarded
//! by a per-job single-flight set. Every failure path is caught and closed
//! into the run record; a failing job never takes the scheduler down.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use uuid::Uuid;

use sb_domain::error::{Error, Result};
use sb_sessions::session_key;

use crate::bus::{BusEvent, CRON_RESULTS_TOPIC};
use crate::runtime::RunOptions;
use crate::state::AppState;

use super::model::{CleanupPolicy, CronJob, CronRun, PayloadType, RunOutcome};

pub struct CronRunner {
    state: AppState,
    /// Jobs currently executing (per-job concurrency cap of 1).
    in_flight: Arc<Mutex<HashSet<Uuid>>>,
}

impl CronRunner {
    pub fn new(state: AppState) -> Self {
        Self {
            state,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Evaluate due jobs and spawn executions. Called from the scheduler
    /// tick loop.
    pub async fn tick(&self) {
        let now = Utc::now();
        for job in self.state.cron.due_jobs(now) {
            if !self.in_flight.lock().insert(job.id) {
                tracing::debug!(job = %job.name, "skipping tick, previous run still in flight");
                continue;
            }

            self.state.cron.mark_fired(&job.id, now);

            let state = self.state.clone();
            let in_flight = self.in_flight.clone();
            let job_id = job.id;
            tokio::spawn(async move {
                execute_job(state, job).await;
                in_flight.lock().remove(&job_id);
            });
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Run one job to completion and record the outcome. Never propagates an
/// error to the scheduler.
pub async fn execute_job(state: AppState, job: CronJob) {
    let run = CronRun::start(job.id);
    let run_id = run.id;
    state.cron.run_started(run.clone());
    tracing::info!(job = %job.name, %run_id, "cron run started");

    let deadline = Duration::from_secs(job.timeout_seconds.max(1));
    let outcome = tokio::time::timeout(deadline, run_payload(&state, &job, run_id)).await;

    let finished = match outcome {
        Ok(Ok(content)) => {
            deliver(&state, &job, &content).await;
            run.finish(RunOutcome::Completed, Some(content), None)
        }
        Ok(Err(e)) => {
            tracing::warn!(job = %job.name, error = %e, "cron run failed");
            run.finish(RunOutcome::Failed, None, Some(e.to_string()))
        }
        Err(_) => {
            tracing::warn!(job = %job.name, timeout_s = job.timeout_seconds, "cron run timed out");
            run.finish(
                RunOutcome::Timeout,
                None,
                Some(format!("timed out after {}s", job.timeout_seconds)),
            )
        }
    };
    state.cron.run_finished(finished);
}

/// Drive the job's command through a session per its payload strategy and
/// return the final assistant content.
async fn run_payload(state: &AppState, job: &CronJob, run_id: Uuid) -> Result<String> {
    match job.payload {
        PayloadType::SystemEvent => {
            let (target_key, temporary) = resolve_system_event_target(state, job, run_id);
            let reply = state
                .registry
                .send_message(&target_key, None, &job.command, RunOptions::default(), None)
                .await;
            if temporary {
                state.registry.delete_session(&target_key);
            }
            reply
        }
        PayloadType::AgentTurn => {
            // Always a fresh isolated session.
            let key = session_key::for_cron(&job.id.to_string(), &run_id.to_string());
            let reply = state
                .registry
                .send_message(&key, None, &job.command, RunOptions::default(), None)
                .await;
            match job.cleanup {
                CleanupPolicy::Delete => {
                    state.registry.delete_session(&key);
                }
                CleanupPolicy::Keep => {
                    state.registry.archive_session(&key);
                }
            }
            reply
        }
    }
}

/// Target resolution for `system_event`: the job's explicit session, else
/// the agent's most recently active session, else a temporary one.
fn resolve_system_event_target(state: &AppState, job: &CronJob, run_id: Uuid) -> (String, bool) {
    if let Some(ref key) = job.session_key {
        return (key.clone(), false);
    }
    if let Some(entry) = state
        .runtime
        .sessions
        .most_recent_active(job.agent_id.as_deref())
    {
        return (entry.session_key, false);
    }
    (
        session_key::for_cron(&job.id.to_string(), &format!("tmp-{run_id}")),
        true,
    )
}

/// Deliver a completed run's content: notification targets, the result
/// session's history, and the shared results topic as a fallback.
async fn deliver(state: &AppState, job: &CronJob, content: &str) {
    let targets = job
        .effective_notify(|channel| state.runtime.channels.push_capable(channel));
    for target in &targets {
        if let Err(e) = state
            .runtime
            .channels
            .send(&target.channel, &target.target, content)
            .await
        {
            tracing::warn!(
                job = %job.name,
                channel = %target.channel,
                error = %e,
                "cron notification delivery failed"
            );
        }
    }

    if let Some(ref result_key) = job.result_session_key {
        if let Err(e) = append_result(state, result_key, job, content) {
            tracing::warn!(job = %job.name, error = %e, "appending cron result failed");
        }
    } else {
        state.runtime.bus.publish(
            CRON_RESULTS_TOPIC,
            BusEvent::CronResult {
                job_name: job.name.clone(),
                content: content.to_owned(),
            },
        );
    }
}

fn append_result(state: &AppState, result_key: &str, job: &CronJob, content: &str) -> Result<()> {
    let (entry, _) = state.runtime.sessions.resolve_or_create(
        result_key,
        session_key::channel_of(result_key),
        job.agent_id.as_deref(),
    );
    let mut record = sb_sessions::MessageRecord::assistant(content);
    record.model = Some(format!("cron:{}", job.name));
    state
        .runtime
        .log
        .append(&entry.session_id, &[record])
        .map_err(|e| Error::Persistence(e.to_string()))?;
    state
        .runtime
        .sessions
        .bump_message_count(result_key, 1);
    Ok(())
}
