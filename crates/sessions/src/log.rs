//! Append-only JSONL message logs.
//!
//! Each session id gets a `<sessionId>.jsonl` file under `messages/` in the
//! state path; every turn is one JSON line. Ordering is append order. Run
//! preparation reads only the trailing window rather than keeping history in
//! memory between runs.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sb_domain::error::{Error, Result};
use sb_domain::message::ToolCall;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One persisted conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub timestamp: DateTime<Utc>,
    /// `user | assistant | tool | system`
    pub role: String,
    pub content: String,
    /// Present on assistant turns that requested tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Present on tool turns; references a prior assistant tool call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u32>,
}

impl MessageRecord {
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            role: role.to_owned(),
            content: content.to_owned(),
            tool_calls: None,
            tool_call_id: None,
            model: None,
            input_tokens: None,
            output_tokens: None,
        }
    }

    pub fn user(content: &str) -> Self {
        Self::new("user", content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::new("assistant", content)
    }

    pub fn assistant_with_calls(content: &str, calls: Vec<ToolCall>) -> Self {
        let mut rec = Self::new("assistant", content);
        rec.tool_calls = Some(calls);
        rec
    }

    pub fn tool(tool_call_id: &str, content: &str) -> Self {
        let mut rec = Self::new("tool", content);
        rec.tool_call_id = Some(tool_call_id.to_owned());
        rec
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Writer/reader for per-session JSONL message files.
pub struct MessageLog {
    base_dir: PathBuf,
}

impl MessageLog {
    pub fn open(state_path: &Path) -> Result<Self> {
        let base_dir = state_path.join("messages");
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;
        Ok(Self { base_dir })
    }

    fn path_for(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{session_id}.jsonl"))
    }

    /// Append records to a session's log. A failure here is a persistence
    /// failure: the caller aborts the current run.
    pub fn append(&self, session_id: &str, records: &[MessageRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut buf = String::new();
        for record in records {
            let line = serde_json::to_string(record)
                .map_err(|e| Error::Persistence(format!("serializing message: {e}")))?;
            buf.push_str(&line);
            buf.push('\n');
        }

        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.path_for(session_id))
            .map_err(|e| Error::Persistence(format!("opening message log: {e}")))?;
        file.write_all(buf.as_bytes())
            .map_err(|e| Error::Persistence(format!("appending message log: {e}")))?;
        Ok(())
    }

    /// Read the trailing `limit` records of a session's log in order.
    pub fn tail(&self, session_id: &str, limit: usize) -> Result<Vec<MessageRecord>> {
        let path = self.path_for(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::Persistence(format!("reading message log: {e}")))?;

        let mut records: Vec<MessageRecord> = Vec::new();
        for line in raw.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<MessageRecord>(line) {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "skipping malformed message line");
                }
            }
        }

        if records.len() > limit {
            records.drain(..records.len() - limit);
        }
        Ok(records)
    }

    /// Full history (dashboards, tests).
    pub fn read_all(&self, session_id: &str) -> Result<Vec<MessageRecord>> {
        self.tail(session_id, usize::MAX)
    }

    /// Delete a session's log file (cron cleanup, session delete).
    pub fn remove(&self, session_id: &str) -> Result<()> {
        let path = self.path_for(session_id);
        if path.exists() {
            std::fs::remove_file(&path)
                .map_err(|e| Error::Persistence(format!("removing message log: {e}")))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn log() -> (tempfile::TempDir, MessageLog) {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::open(dir.path()).unwrap();
        (dir, log)
    }

    #[test]
    fn append_then_read_round_trip() {
        let (_dir, log) = log();
        log.append(
            "s1",
            &[MessageRecord::user("hi"), MessageRecord::assistant("hello")],
        )
        .unwrap();

        let records = log.read_all("s1").unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].role, "user");
        assert_eq!(records[1].content, "hello");
    }

    #[test]
    fn tail_returns_trailing_window_in_order() {
        let (_dir, log) = log();
        for i in 0..10 {
            log.append("s1", &[MessageRecord::user(&format!("m{i}"))])
                .unwrap();
        }
        let records = log.tail("s1", 3).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].content, "m7");
        assert_eq!(records[2].content, "m9");
    }

    #[test]
    fn missing_log_is_empty() {
        let (_dir, log) = log();
        assert!(log.tail("ghost", 10).unwrap().is_empty());
    }

    #[test]
    fn tool_calls_survive_round_trip() {
        let (_dir, log) = log();
        let calls = vec![ToolCall {
            id: "t1".into(),
            name: "calc".into(),
            arguments: serde_json::json!({"expr": "2+2"}),
        }];
        log.append(
            "s1",
            &[
                MessageRecord::assistant_with_calls("", calls),
                MessageRecord::tool("t1", "4"),
            ],
        )
        .unwrap();

        let records = log.read_all("s1").unwrap();
        let assistant = &records[0];
        assert_eq!(assistant.tool_calls.as_ref().unwrap()[0].id, "t1");
        let tool = &records[1];
        assert_eq!(tool.tool_call_id.as_deref(), Some("t1"));
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let log = MessageLog::open(dir.path()).unwrap();
        log.append("s1", &[MessageRecord::user("ok")]).unwrap();

        use std::io::Write;
        let path = dir.path().join("messages").join("s1.jsonl");
        let mut f = std::fs::OpenOptions::new().append(true).open(path).unwrap();
        writeln!(f, "not json").unwrap();

        let records = log.read_all("s1").unwrap();
        assert_eq!(records.len(), 1);
    }

    #[test]
    fn remove_deletes_file() {
        let (_dir, log) = log();
        log.append("s1", &[MessageRecord::user("hi")]).unwrap();
        log.remove("s1").unwrap();
        assert!(log.read_all("s1").unwrap().is_empty());
        // Removing again is a no-op.
        log.remove("s1").unwrap();
    }
}
