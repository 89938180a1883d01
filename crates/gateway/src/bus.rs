//! Topic-based pub/sub bus.
//!
//! A bus, not a transport: publishing is fire-and-forget, slow subscribers
//! lose events (bounded broadcast buffers), and nothing retries. Consumers
//! needing catch-up semantics read persisted storage instead.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Capacity of each topic's ring buffer.
const TOPIC_CAPACITY: usize = 256;

/// Topic carrying results of cron jobs with no result session.
pub const CRON_RESULTS_TOPIC: &str = "cron:results";

/// The per-session streaming topic.
pub fn agent_topic(session_key: &str) -> String {
    format!("agent:{session_key}")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Events
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Phases reported on `agent:<session_key>` status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Started,
    Inferring,
    ToolStart,
    ToolDone,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// A raw streamed text delta from the current inference.
    Chunk { run_id: Uuid, text: String },

    /// A phase transition of the current run.
    Status {
        run_id: Uuid,
        phase: RunPhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// Terminal event carrying the final assistant content.
    Done { run_id: Uuid, content: String },

    /// The run failed; `reason` uses the shared error vocabulary.
    Error { run_id: Uuid, reason: String },

    /// A cron job finished without a result session configured.
    CronResult { job_name: String, content: String },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct EventBus {
    topics: RwLock<HashMap<String, broadcast::Sender<BusEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusEvent> {
        if let Some(tx) = self.topics.read().get(topic) {
            return tx.clone();
        }
        let mut topics = self.topics.write();
        topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Publish; silently dropped when the topic has no subscribers.
    pub fn publish(&self, topic: &str, event: BusEvent) {
        let _ = self.sender(topic).send(event);
    }

    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusEvent> {
        self.sender(topic).subscribe()
    }

    /// Drop topics nobody listens to (called from the maintenance tick).
    pub fn prune(&self) {
        self.topics.write().retain(|_, tx| tx.receiver_count() > 0);
    }

    pub fn topic_count(&self) -> usize {
        self.topics.read().len()
    }
}
