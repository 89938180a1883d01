//! Shell tool — run a command foreground or background.
//!
//! Semantics:
//! - Foreground: run, wait up to the yield window, return output.
//! - Background: spawn, return immediately with a process id + empty tail.
//! - A foreground command that outlives the yield window auto-backgrounds
//!   and returns its process id; the `process` tool picks it up from there.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, Notify};

use sb_domain::error::{Error, Result};

use crate::process::{OutputBuffer, ProcessManager, ProcessSession, ProcessStatus};
use crate::tool::{Tool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// shell
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ShellParams {
    command: String,
    #[serde(default)]
    background: bool,
    #[serde(default)]
    workdir: Option<String>,
    /// Override the foreground yield window (ms).
    #[serde(default)]
    yield_ms: Option<u64>,
    /// Override the hard timeout (seconds).
    #[serde(default)]
    timeout_sec: Option<u64>,
}

pub struct ShellTool {
    manager: Arc<ProcessManager>,
}

impl ShellTool {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }
}

#[async_trait::async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Run a shell command. Long-running commands are backgrounded and \
         return a process id for the process tool."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": { "type": "string", "description": "Shell command to execute" },
                "background": { "type": "boolean", "description": "Run in the background" },
                "workdir": { "type": "string", "description": "Working directory" },
                "timeout_sec": { "type": "integer", "description": "Hard timeout in seconds" }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let req: ShellParams = serde_json::from_value(params)
            .map_err(|e| Error::parse("tool_args", e))?;
        Ok(run_shell(&self.manager, req).await)
    }
}

async fn run_shell(manager: &ProcessManager, req: ShellParams) -> Value {
    let cfg = manager.config();
    let yield_ms = if req.background {
        0
    } else {
        req.yield_ms.unwrap_or(cfg.background_ms)
    };
    let timeout_sec = req.timeout_sec.unwrap_or(cfg.timeout_sec);

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(&req.command);
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.stdin(std::process::Stdio::null());
    if let Some(ref wd) = req.workdir {
        cmd.current_dir(wd);
    }

    let child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            return json!({
                "status": ProcessStatus::Failed,
                "output": format!("failed to spawn: {e}"),
            });
        }
    };

    let process_id = uuid::Uuid::new_v4().to_string();
    let (kill_tx, kill_rx) = mpsc::channel::<()>(1);
    let session = manager.register(ProcessSession {
        id: process_id.clone(),
        command: req.command.clone(),
        started_at: Utc::now(),
        finished_at: None,
        status: ProcessStatus::Running,
        exit_code: None,
        output: OutputBuffer::new(cfg.max_output_chars),
        kill_tx: Some(kill_tx),
    });

    let done = Arc::new(Notify::new());
    spawn_monitor(child, session.clone(), kill_rx, timeout_sec, done.clone());

    if req.background {
        return json!({
            "status": ProcessStatus::Running,
            "process_id": process_id,
            "tail": "",
        });
    }

    let yield_window = if yield_ms > 0 {
        std::time::Duration::from_millis(yield_ms)
    } else {
        std::time::Duration::from_secs(timeout_sec)
    };

    tokio::select! {
        _ = done.notified() => {
            let s = session.read();
            json!({
                "status": s.status,
                "exit_code": s.exit_code,
                "output": s.output.snapshot(),
            })
        }
        _ = tokio::time::sleep(yield_window) => {
            // Still running: auto-background.
            let tail = session.read().output.tail(20);
            json!({
                "status": ProcessStatus::Running,
                "process_id": process_id,
                "tail": tail,
            })
        }
    }
}

/// Monitor task: drain stdout/stderr into the session buffer, then wait for
/// exit, a kill signal, or the hard timeout.
fn spawn_monitor(
    mut child: tokio::process::Child,
    session: Arc<parking_lot::RwLock<ProcessSession>>,
    mut kill_rx: mpsc::Receiver<()>,
    timeout_sec: u64,
    done: Arc<Notify>,
) {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    tokio::spawn(async move {
        let session_out = session.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut s = session_out.write();
                    s.output.push(&line);
                    s.output.push("\n");
                }
            }
        });
        let session_err = session.clone();
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    let mut s = session_err.write();
                    s.output.push(&line);
                    s.output.push("\n");
                }
            }
        });

        let finish = |status: ProcessStatus, exit_code: Option<i32>, note: Option<&str>| {
            let mut s = session.write();
            if let Some(note) = note {
                s.output.push(note);
            }
            s.status = status;
            s.exit_code = exit_code;
            s.finished_at = Some(Utc::now());
            s.kill_tx = None;
        };

        tokio::select! {
            result = child.wait() => {
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                match result {
                    Ok(exit) => finish(ProcessStatus::Finished, exit.code(), None),
                    Err(e) => finish(
                        ProcessStatus::Failed,
                        None,
                        Some(&format!("\n[process error: {e}]")),
                    ),
                }
            }
            _ = kill_rx.recv() => {
                let _ = child.kill().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                finish(ProcessStatus::Killed, None, Some("\n[killed]"));
            }
            _ = tokio::time::sleep(std::time::Duration::from_secs(timeout_sec)) => {
                let _ = child.kill().await;
                let _ = stdout_task.await;
                let _ = stderr_task.await;
                finish(ProcessStatus::TimedOut, None, Some("\n[timed out]"));
            }
        }

        done.notify_waiters();
    });
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// process
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ProcessParams {
    action: String,
    #[serde(default)]
    process_id: Option<String>,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    lines: Option<usize>,
}

pub struct ProcessTool {
    manager: Arc<ProcessManager>,
}

impl ProcessTool {
    pub fn new(manager: Arc<ProcessManager>) -> Self {
        Self { manager }
    }

    fn require_id<'a>(&self, req: &'a ProcessParams) -> Result<&'a str> {
        req.process_id
            .as_deref()
            .ok_or_else(|| Error::parse("tool_args", "missing 'process_id'"))
    }
}

#[async_trait::async_trait]
impl Tool for ProcessTool {
    fn name(&self) -> &str {
        "process"
    }

    fn description(&self) -> &str {
        "Manage background processes: list, poll, log, kill, clear."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "action": {
                    "type": "string",
                    "enum": ["list", "poll", "log", "kill", "clear"],
                    "description": "Action to perform"
                },
                "process_id": { "type": "string", "description": "Process id from the shell tool" },
                "offset": { "type": "integer", "description": "Poll: read output from this offset" },
                "lines": { "type": "integer", "description": "Log: tail this many lines (default 200)" }
            },
            "required": ["action"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let req: ProcessParams = serde_json::from_value(params)
            .map_err(|e| Error::parse("tool_args", e))?;

        match req.action.as_str() {
            "list" => Ok(json!({"processes": self.manager.list()})),
            "poll" => {
                let id = self.require_id(&req)?;
                let result = self
                    .manager
                    .poll(id, req.offset.unwrap_or(0))
                    .ok_or_else(|| Error::NotRunning(format!("no process '{id}'")))?;
                Ok(serde_json::to_value(result)?)
            }
            "log" => {
                let id = self.require_id(&req)?;
                let log = self
                    .manager
                    .log_tail(id, req.lines.unwrap_or(200))
                    .ok_or_else(|| Error::NotRunning(format!("no process '{id}'")))?;
                Ok(json!({"process_id": id, "log": log}))
            }
            "kill" => {
                let id = self.require_id(&req)?;
                Ok(json!({"process_id": id, "killed": self.manager.kill(id)}))
            }
            "clear" => Ok(json!({"cleared": self.manager.clear_finished()})),
            other => Err(Error::parse("tool_args", format!("unknown action '{other}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::config::ExecConfig;

    fn tools() -> (Arc<ProcessManager>, ShellTool, ProcessTool) {
        let manager = Arc::new(ProcessManager::new(ExecConfig::default()));
        (
            manager.clone(),
            ShellTool::new(manager.clone()),
            ProcessTool::new(manager),
        )
    }

    #[tokio::test]
    async fn foreground_command_returns_output() {
        let (_m, shell, _p) = tools();
        let out = shell
            .execute(json!({"command": "echo hello"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out["status"], "finished");
        assert_eq!(out["exit_code"], 0);
        assert!(out["output"].as_str().unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn failing_command_reports_exit_code() {
        let (_m, shell, _p) = tools();
        let out = shell
            .execute(json!({"command": "exit 3"}), &ToolContext::default())
            .await
            .unwrap();
        assert_eq!(out["status"], "finished");
        assert_eq!(out["exit_code"], 3);
    }

    #[tokio::test]
    async fn slow_command_auto_backgrounds() {
        let (m, shell, _p) = tools();
        let out = shell
            .execute(
                json!({"command": "sleep 5", "yield_ms": 50}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out["status"], "running");
        let id = out["process_id"].as_str().unwrap();
        assert!(m.get(id).is_some());
        m.kill(id);
    }

    #[tokio::test]
    async fn background_then_poll_and_kill() {
        let (_m, shell, process) = tools();
        let out = shell
            .execute(
                json!({"command": "echo bg; sleep 5", "background": true}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        let id = out["process_id"].as_str().unwrap().to_owned();

        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        let polled = process
            .execute(
                json!({"action": "poll", "process_id": id}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert!(polled["new_output"].as_str().unwrap().contains("bg"));

        let killed = process
            .execute(
                json!({"action": "kill", "process_id": id}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(killed["killed"], true);
    }

    #[tokio::test]
    async fn unknown_action_is_a_parse_error() {
        let (_m, _shell, process) = tools();
        let err = process
            .execute(json!({"action": "dance"}), &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
