//! Session worker — the single supervised task that owns one agent loop.
//!
//! All interaction goes through the worker's inbox; the loop's state is
//! touched by exactly one task. A worker that panics closes its inbox:
//! waiting callers get `WorkerDied` and the registry starts a fresh worker
//! on the next message.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use sb_domain::error::{Error, Result};
use sb_sessions::SessionEntry;

use crate::state::RuntimeHandle;

use super::agent_loop::{AgentLoop, LoopEvent, RunOptions};

/// Inbox depth; deltas from the stream reader dominate the traffic.
const INBOX_CAPACITY: usize = 256;

/// Cloneable handle to a running session worker.
#[derive(Clone)]
pub struct WorkerHandle {
    pub session: SessionEntry,
    tx: mpsc::Sender<LoopEvent>,
}

impl WorkerHandle {
    /// Spawn the worker task for a session.
    pub fn spawn(deps: Arc<RuntimeHandle>, session: SessionEntry) -> Self {
        let (tx, mut rx) = mpsc::channel::<LoopEvent>(INBOX_CAPACITY);
        let mut agent_loop = AgentLoop::new(deps, session.clone(), tx.clone());

        let session_key = session.session_key.clone();
        let span = tracing::info_span!("session_worker", %session_key);
        tokio::spawn(tracing::Instrument::instrument(
            async move {
                tracing::debug!("session worker started");
                while let Some(event) = rx.recv().await {
                    if !agent_loop.handle(event).await {
                        break;
                    }
                }
                tracing::debug!("session worker stopped");
            },
            span,
        ));

        Self { session, tx }
    }

    /// Run a turn and wait for the final content.
    ///
    /// `wait_timeout` bounds the caller's wait only; the run itself is
    /// bounded by its own run timeout inside the loop.
    pub async fn send_message(
        &self,
        text: &str,
        opts: RunOptions,
        wait_timeout: Option<Duration>,
    ) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(LoopEvent::Run {
                text: text.to_owned(),
                opts,
                reply: Some(reply_tx),
            })
            .await
            .map_err(|_| Error::WorkerDied)?;

        match wait_timeout {
            Some(limit) => tokio::time::timeout(limit, reply_rx)
                .await
                .map_err(|_| Error::Timeout)?
                .map_err(|_| Error::WorkerDied)?,
            None => reply_rx.await.map_err(|_| Error::WorkerDied)?,
        }
    }

    /// Fire-and-forget turn; the result is published on the session topic.
    pub fn send_message_async(&self, text: &str, opts: RunOptions) -> Result<()> {
        self.tx
            .try_send(LoopEvent::Run {
                text: text.to_owned(),
                opts,
                reply: None,
            })
            .map_err(|_| Error::WorkerDied)
    }

    /// Cancel the in-flight run, if any.
    pub fn cancel(&self) -> bool {
        self.tx.try_send(LoopEvent::Cancel).is_ok()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.try_send(LoopEvent::Shutdown);
    }

    pub fn is_alive(&self) -> bool {
        !self.tx.is_closed()
    }
}
