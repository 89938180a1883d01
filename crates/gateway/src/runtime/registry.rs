//! Session registry — addressing and lifecycle for session workers.
//!
//! One live worker per session key. Workers start lazily on the first
//! routed message, restart transparently after a crash, and stop on
//! archive/delete or idle reaping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;

use sb_domain::error::Result;

use crate::state::RuntimeHandle;

use super::agent_loop::RunOptions;
use super::worker::WorkerHandle;

pub struct SessionRegistry {
    deps: Arc<RuntimeHandle>,
    workers: Mutex<HashMap<String, WorkerHandle>>,
}

impl SessionRegistry {
    pub fn new(deps: Arc<RuntimeHandle>) -> Arc<Self> {
        Arc::new(Self {
            deps,
            workers: Mutex::new(HashMap::new()),
        })
    }

    pub fn runtime(&self) -> &Arc<RuntimeHandle> {
        &self.deps
    }

    /// Idempotent worker start: an existing live worker is returned as-is;
    /// a dead one is replaced; otherwise the session row is resolved (or
    /// created) and a fresh worker spawned.
    pub fn start_session(
        &self,
        session_key: &str,
        channel: Option<&str>,
        agent_id: Option<&str>,
    ) -> WorkerHandle {
        let mut workers = self.workers.lock();

        if let Some(handle) = workers.get(session_key) {
            if handle.is_alive() {
                return handle.clone();
            }
            tracing::warn!(session_key, "replacing dead session worker");
            workers.remove(session_key);
        }

        let (entry, created) = self
            .deps
            .sessions
            .resolve_or_create(session_key, channel, agent_id);
        if created {
            tracing::info!(session_key, session_id = %entry.session_id, "session created");
        }
        let handle = WorkerHandle::spawn(self.deps.clone(), entry);
        workers.insert(session_key.to_owned(), handle.clone());
        handle
    }

    /// Synchronous turn against a session (started if needed).
    pub async fn send_message(
        &self,
        session_key: &str,
        channel: Option<&str>,
        text: &str,
        opts: RunOptions,
        wait_timeout: Option<Duration>,
    ) -> Result<String> {
        let handle = self.start_session(session_key, channel, None);
        let result = handle.send_message(text, opts, wait_timeout).await;
        if matches!(result, Err(sb_domain::error::Error::WorkerDied)) {
            // Drop the dead handle so the next message restarts cleanly.
            self.workers.lock().remove(session_key);
        }
        result
    }

    /// Fire-and-forget turn; the result lands on `agent:<session_key>`.
    pub fn send_message_async(
        &self,
        session_key: &str,
        channel: Option<&str>,
        text: &str,
        opts: RunOptions,
    ) -> Result<()> {
        self.start_session(session_key, channel, None)
            .send_message_async(text, opts)
    }

    /// Cancel a session's in-flight run. Returns whether a worker existed.
    pub fn stop_run(&self, session_key: &str) -> bool {
        match self.workers.lock().get(session_key) {
            Some(handle) => handle.cancel(),
            None => false,
        }
    }

    /// Archive the persisted session and stop its worker.
    pub fn archive_session(&self, session_key: &str) -> bool {
        if let Some(handle) = self.workers.lock().remove(session_key) {
            handle.shutdown();
        }
        self.deps.sessions.archive(session_key).is_some()
    }

    /// Remove the session row and its message log, stopping the worker.
    pub fn delete_session(&self, session_key: &str) -> bool {
        if let Some(handle) = self.workers.lock().remove(session_key) {
            handle.shutdown();
        }
        match self.deps.sessions.delete(session_key) {
            Some(entry) => {
                if let Err(e) = self.deps.log.remove(&entry.session_id) {
                    tracing::warn!(error = %e, session_key, "removing message log failed");
                }
                true
            }
            None => false,
        }
    }

    /// Stop workers whose sessions have been idle longer than `max_idle`.
    /// The persisted session survives and restarts on the next message.
    pub fn prune_idle(&self, max_idle: Duration) {
        let now = Utc::now();
        let mut workers = self.workers.lock();
        workers.retain(|key, handle| {
            if !handle.is_alive() {
                return false;
            }
            let idle = now
                .signed_duration_since(handle.session.last_active_at)
                .to_std()
                .unwrap_or_default();
            let stale = match self.deps.sessions.get(key) {
                Some(entry) => now
                    .signed_duration_since(entry.last_active_at)
                    .to_std()
                    .unwrap_or(idle),
                None => idle,
            };
            if stale > max_idle {
                tracing::info!(session_key = %key, "stopping idle session worker");
                handle.shutdown();
                false
            } else {
                true
            }
        });
    }

    /// Number of live workers (dead handles are not counted).
    pub fn live_count(&self) -> usize {
        self.workers.lock().values().filter(|h| h.is_alive()).count()
    }
}
