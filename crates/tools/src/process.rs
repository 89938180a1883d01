//! In-memory background-process registry.
//!
//! The manager owns no child processes directly — each spawn creates a
//! monitoring task that writes into the shared `ProcessSession`. The shell
//! tool registers sessions here; the `process` tool reads them back.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use sb_domain::config::ExecConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Running,
    Finished,
    Killed,
    TimedOut,
    Failed,
}

/// Shared mutable state for one background process.
pub struct ProcessSession {
    pub id: String,
    pub command: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub output: OutputBuffer,
    /// Signals the monitor task to kill the child.
    pub kill_tx: Option<mpsc::Sender<()>>,
}

/// Bounded combined stdout+stderr buffer. When over capacity, the oldest
/// quarter is dropped on a char boundary.
pub struct OutputBuffer {
    combined: String,
    max_chars: usize,
}

impl OutputBuffer {
    pub fn new(max_chars: usize) -> Self {
        Self {
            combined: String::new(),
            max_chars,
        }
    }

    pub fn push(&mut self, text: &str) {
        self.combined.push_str(text);
        if self.combined.len() > self.max_chars {
            let keep = self.max_chars * 3 / 4;
            let mut boundary = self.combined.len() - keep;
            while boundary < self.combined.len() && !self.combined.is_char_boundary(boundary) {
                boundary += 1;
            }
            self.combined.drain(..boundary);
        }
    }

    pub fn len(&self) -> usize {
        self.combined.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combined.is_empty()
    }

    pub fn snapshot(&self) -> String {
        self.combined.clone()
    }

    pub fn tail(&self, lines: usize) -> String {
        let all: Vec<&str> = self.combined.lines().collect();
        if all.len() <= lines {
            self.combined.clone()
        } else {
            all[all.len() - lines..].join("\n")
        }
    }

    pub fn read_from(&self, offset: usize) -> &str {
        let start = offset.min(self.combined.len());
        &self.combined[start..]
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ProcessManager
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Registry of active and recently-finished process sessions.
pub struct ProcessManager {
    sessions: RwLock<HashMap<String, Arc<RwLock<ProcessSession>>>>,
    config: ExecConfig,
}

impl ProcessManager {
    pub fn new(config: ExecConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &ExecConfig {
        &self.config
    }

    pub fn register(&self, session: ProcessSession) -> Arc<RwLock<ProcessSession>> {
        let id = session.id.clone();
        let arc = Arc::new(RwLock::new(session));
        self.sessions.write().insert(id, arc.clone());
        arc
    }

    pub fn get(&self, id: &str) -> Option<Arc<RwLock<ProcessSession>>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn list(&self) -> Vec<ProcessInfo> {
        self.sessions
            .read()
            .values()
            .map(|s| {
                let s = s.read();
                ProcessInfo {
                    id: s.id.clone(),
                    command: s.command.clone(),
                    status: s.status,
                    exit_code: s.exit_code,
                    started_at: s.started_at,
                    finished_at: s.finished_at,
                    output_chars: s.output.len(),
                }
            })
            .collect()
    }

    /// Incremental output since `offset` plus current status.
    pub fn poll(&self, id: &str, offset: usize) -> Option<PollResult> {
        let sessions = self.sessions.read();
        let s = sessions.get(id)?.read();
        Some(PollResult {
            status: s.status,
            exit_code: s.exit_code,
            new_output: s.output.read_from(offset).to_owned(),
            next_offset: s.output.len(),
        })
    }

    pub fn log_tail(&self, id: &str, lines: usize) -> Option<String> {
        let sessions = self.sessions.read();
        let tail = sessions.get(id)?.read().output.tail(lines);
        Some(tail)
    }

    /// Signal a running process to die. Returns whether a signal was sent.
    pub fn kill(&self, id: &str) -> bool {
        let sessions = self.sessions.read();
        if let Some(arc) = sessions.get(id) {
            let s = arc.read();
            if s.status == ProcessStatus::Running {
                if let Some(ref tx) = s.kill_tx {
                    let _ = tx.try_send(());
                    return true;
                }
            }
        }
        false
    }

    /// Drop all non-running sessions. Returns how many were removed.
    pub fn clear_finished(&self) -> usize {
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, v| v.read().status == ProcessStatus::Running);
        before - sessions.len()
    }

    /// Evict finished sessions older than the configured cleanup window.
    pub fn cleanup_stale(&self) {
        let cutoff_ms = self.config.cleanup_ms as i64;
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        sessions.retain(|_, v| match v.read().finished_at {
            Some(finished) => now.signed_duration_since(finished).num_milliseconds() < cutoff_ms,
            None => true,
        });
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessInfo {
    pub id: String,
    pub command: String,
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub output_chars: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PollResult {
    pub status: ProcessStatus,
    pub exit_code: Option<i32>,
    pub new_output: String,
    pub next_offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, status: ProcessStatus) -> ProcessSession {
        ProcessSession {
            id: id.into(),
            command: "true".into(),
            started_at: Utc::now(),
            finished_at: (status != ProcessStatus::Running).then(Utc::now),
            status,
            exit_code: None,
            output: OutputBuffer::new(1000),
            kill_tx: None,
        }
    }

    #[test]
    fn output_buffer_truncates_on_overflow() {
        let mut buf = OutputBuffer::new(100);
        for _ in 0..30 {
            buf.push("0123456789");
        }
        assert!(buf.len() <= 100);
        // The tail survives.
        assert!(buf.snapshot().ends_with("0123456789"));
    }

    #[test]
    fn output_buffer_respects_char_boundaries() {
        let mut buf = OutputBuffer::new(20);
        for _ in 0..20 {
            buf.push("héé"); // multi-byte
        }
        // Must not panic and must stay valid UTF-8.
        assert!(buf.snapshot().chars().count() > 0);
    }

    #[test]
    fn tail_returns_last_lines() {
        let mut buf = OutputBuffer::new(1000);
        buf.push("a\nb\nc\nd");
        assert_eq!(buf.tail(2), "c\nd");
        assert_eq!(buf.tail(10), "a\nb\nc\nd");
    }

    #[test]
    fn poll_reports_incremental_output() {
        let manager = ProcessManager::new(ExecConfig::default());
        let arc = manager.register(session("p1", ProcessStatus::Running));
        arc.write().output.push("hello ");
        let first = manager.poll("p1", 0).unwrap();
        assert_eq!(first.new_output, "hello ");

        arc.write().output.push("world");
        let second = manager.poll("p1", first.next_offset).unwrap();
        assert_eq!(second.new_output, "world");
    }

    #[test]
    fn clear_finished_keeps_running() {
        let manager = ProcessManager::new(ExecConfig::default());
        manager.register(session("running", ProcessStatus::Running));
        manager.register(session("done", ProcessStatus::Finished));
        assert_eq!(manager.clear_finished(), 1);
        assert!(manager.get("running").is_some());
        assert!(manager.get("done").is_none());
    }

    #[test]
    fn kill_without_channel_reports_false() {
        let manager = ProcessManager::new(ExecConfig::default());
        manager.register(session("p1", ProcessStatus::Running));
        assert!(!manager.kill("p1"));
        assert!(!manager.kill("missing"));
    }
}
