//! Persisted session rows.
//!
//! Each session key maps to one row in `sessions.json` under the state path:
//! identity, channel label, state, owning agent, running counters, and the
//! last-activity timestamp. Rows are created lazily on first routed message.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session row
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    #[default]
    Active,
    Archived,
}

/// One persisted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub session_key: String,
    /// Stable row id; also names the session's message log file.
    pub session_id: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub state: SessionState,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    pub created_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// In-memory map backed by a JSON file, flushed on mutation.
pub struct SessionStore {
    sessions_path: PathBuf,
    sessions: RwLock<HashMap<String, SessionEntry>>,
}

impl SessionStore {
    /// Load or create the store at `state_path/sessions.json`.
    pub fn open(state_path: &Path) -> Result<Self> {
        std::fs::create_dir_all(state_path).map_err(Error::Io)?;
        let sessions_path = state_path.join("sessions.json");

        let sessions = if sessions_path.exists() {
            let raw = std::fs::read_to_string(&sessions_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = sessions.len(),
            path = %sessions_path.display(),
            "session store loaded"
        );

        Ok(Self {
            sessions_path,
            sessions: RwLock::new(sessions),
        })
    }

    pub fn get(&self, session_key: &str) -> Option<SessionEntry> {
        self.sessions.read().get(session_key).cloned()
    }

    /// Resolve or lazily create a session row. Returns `(entry, is_new)`.
    /// An archived row is revived to `Active` when traffic arrives for it.
    pub fn resolve_or_create(
        &self,
        session_key: &str,
        channel: Option<&str>,
        agent_id: Option<&str>,
    ) -> (SessionEntry, bool) {
        {
            let mut sessions = self.sessions.write();
            if let Some(entry) = sessions.get_mut(session_key) {
                if entry.state == SessionState::Archived {
                    entry.state = SessionState::Active;
                }
                return (entry.clone(), false);
            }
        }

        let now = Utc::now();
        let entry = SessionEntry {
            session_key: session_key.to_owned(),
            session_id: uuid::Uuid::new_v4().to_string(),
            channel: channel.map(str::to_owned),
            state: SessionState::Active,
            agent_id: agent_id.map(str::to_owned),
            message_count: 0,
            input_tokens: 0,
            output_tokens: 0,
            created_at: now,
            last_active_at: now,
        };

        self.sessions
            .write()
            .insert(session_key.to_owned(), entry.clone());
        self.flush_best_effort();

        tracing::debug!(session_key, session_id = %entry.session_id, "session created");
        (entry, true)
    }

    /// Update token/message counters after a run.
    pub fn record_usage(&self, session_key: &str, input_tokens: u64, output_tokens: u64) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_key) {
            entry.input_tokens += input_tokens;
            entry.output_tokens += output_tokens;
            entry.last_active_at = Utc::now();
        }
    }

    pub fn bump_message_count(&self, session_key: &str, by: u64) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_key) {
            entry.message_count += by;
            entry.last_active_at = Utc::now();
        }
    }

    pub fn touch(&self, session_key: &str) {
        let mut sessions = self.sessions.write();
        if let Some(entry) = sessions.get_mut(session_key) {
            entry.last_active_at = Utc::now();
        }
    }

    /// Mark a session archived. Returns the row, if it existed.
    pub fn archive(&self, session_key: &str) -> Option<SessionEntry> {
        let entry = {
            let mut sessions = self.sessions.write();
            let entry = sessions.get_mut(session_key)?;
            entry.state = SessionState::Archived;
            entry.clone()
        };
        self.flush_best_effort();
        Some(entry)
    }

    /// Remove a session row entirely. Returns the removed row.
    pub fn delete(&self, session_key: &str) -> Option<SessionEntry> {
        let entry = self.sessions.write().remove(session_key);
        if entry.is_some() {
            self.flush_best_effort();
        }
        entry
    }

    pub fn list(&self) -> Vec<SessionEntry> {
        let mut entries: Vec<_> = self.sessions.read().values().cloned().collect();
        entries.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        entries
    }

    /// The most recently active non-cron, non-archived session for an agent
    /// (or overall when `agent_id` is `None`). Used by cron `system_event`
    /// target resolution.
    pub fn most_recent_active(&self, agent_id: Option<&str>) -> Option<SessionEntry> {
        self.sessions
            .read()
            .values()
            .filter(|e| e.state == SessionState::Active)
            .filter(|e| !crate::session_key::is_cron(&e.session_key))
            .filter(|e| match agent_id {
                Some(id) => e.agent_id.as_deref() == Some(id),
                None => true,
            })
            .max_by_key(|e| e.last_active_at)
            .cloned()
    }

    /// Persist the current map to disk.
    pub fn flush(&self) -> Result<()> {
        let sessions = self.sessions.read();
        let json = serde_json::to_string_pretty(&*sessions)
            .map_err(|e| Error::Persistence(format!("serializing sessions: {e}")))?;
        std::fs::write(&self.sessions_path, json)
            .map_err(|e| Error::Persistence(format!("writing sessions.json: {e}")))?;
        Ok(())
    }

    fn flush_best_effort(&self) {
        if let Err(e) = self.flush() {
            tracing::warn!(error = %e, "session store flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, SessionStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn resolve_creates_then_reuses() {
        let (_dir, store) = store();
        let (a, created) = store.resolve_or_create("telegram:42", Some("telegram"), None);
        assert!(created);
        let (b, created) = store.resolve_or_create("telegram:42", Some("telegram"), None);
        assert!(!created);
        assert_eq!(a.session_id, b.session_id);
    }

    #[test]
    fn archived_session_revives_on_traffic() {
        let (_dir, store) = store();
        store.resolve_or_create("k", None, None);
        store.archive("k");
        assert_eq!(store.get("k").unwrap().state, SessionState::Archived);
        let (entry, created) = store.resolve_or_create("k", None, None);
        assert!(!created);
        assert_eq!(entry.state, SessionState::Active);
    }

    #[test]
    fn usage_counters_accumulate() {
        let (_dir, store) = store();
        store.resolve_or_create("k", None, None);
        store.record_usage("k", 10, 5);
        store.record_usage("k", 1, 2);
        let entry = store.get("k").unwrap();
        assert_eq!(entry.input_tokens, 11);
        assert_eq!(entry.output_tokens, 7);
    }

    #[test]
    fn delete_removes_row() {
        let (_dir, store) = store();
        store.resolve_or_create("k", None, None);
        assert!(store.delete("k").is_some());
        assert!(store.get("k").is_none());
        assert!(store.delete("k").is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = SessionStore::open(dir.path()).unwrap();
            store.resolve_or_create("telegram:42", Some("telegram"), Some("agent-a"));
        }
        let store = SessionStore::open(dir.path()).unwrap();
        let entry = store.get("telegram:42").unwrap();
        assert_eq!(entry.channel.as_deref(), Some("telegram"));
        assert_eq!(entry.agent_id.as_deref(), Some("agent-a"));
    }

    #[test]
    fn most_recent_active_skips_cron_and_archived() {
        let (_dir, store) = store();
        store.resolve_or_create("cron:j:r", None, Some("a"));
        store.resolve_or_create("telegram:1", Some("telegram"), Some("a"));
        store.resolve_or_create("telegram:2", Some("telegram"), Some("a"));
        store.archive("telegram:2");

        let found = store.most_recent_active(Some("a")).unwrap();
        assert_eq!(found.session_key, "telegram:1");
    }

    #[test]
    fn most_recent_active_filters_by_agent() {
        let (_dir, store) = store();
        store.resolve_or_create("telegram:1", Some("telegram"), Some("a"));
        store.resolve_or_create("telegram:2", Some("telegram"), Some("b"));
        let found = store.most_recent_active(Some("b")).unwrap();
        assert_eq!(found.session_key, "telegram:2");
        assert!(store.most_recent_active(Some("c")).is_none());
    }
}
