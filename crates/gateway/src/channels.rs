//! Channel senders — the outbound interface to messaging front-ends.
//!
//! Concrete protocol bindings (Telegram, Discord, web UIs) live outside
//! this repository; they register a sender per channel label at startup.
//! The runtime uses the registry for chunked segment delivery and cron
//! notifications. Delivery is at-most-once; failures are logged, not
//! retried.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use sb_domain::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sender contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    /// Channel-native id of the message being replied to.
    pub reply_to: Option<String>,
}

#[async_trait::async_trait]
pub trait ChannelSender: Send + Sync {
    /// The channel label this sender serves (e.g. `"telegram"`).
    fn name(&self) -> &str;

    /// Whether the channel can receive unsolicited pushes (drives cron
    /// auto-notify).
    fn push_capable(&self) -> bool {
        true
    }

    async fn send_message(&self, target: &str, text: &str, opts: SendOptions) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ChannelRegistry {
    senders: RwLock<HashMap<String, Arc<dyn ChannelSender>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, sender: Arc<dyn ChannelSender>) {
        self.senders
            .write()
            .insert(sender.name().to_owned(), sender);
    }

    pub fn get(&self, channel: &str) -> Option<Arc<dyn ChannelSender>> {
        self.senders.read().get(channel).cloned()
    }

    /// Unknown channels are not push-capable.
    pub fn push_capable(&self, channel: &str) -> bool {
        self.get(channel).map(|s| s.push_capable()).unwrap_or(false)
    }

    pub async fn send(&self, channel: &str, target: &str, text: &str) -> Result<()> {
        let sender = self
            .get(channel)
            .ok_or_else(|| Error::NotRunning(format!("no sender for channel '{channel}'")))?;
        sender
            .send_message(target, text, SendOptions::default())
            .await
    }
}
