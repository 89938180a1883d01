use std::sync::Arc;

use sb_browser::BrowserController;
use sb_domain::config::Config;
use sb_memory::MemoryBackend;
use sb_providers::ProviderRegistry;
use sb_sessions::{MessageLog, SessionStore};
use sb_tools::{ProcessManager, ToolRegistry};

use crate::bus::EventBus;
use crate::channels::ChannelRegistry;
use crate::cron::CronStore;
use crate::runtime::registry::SessionRegistry;

/// Everything a session worker needs to run the agent loop.
///
/// Deliberately excludes the session registry itself — workers never reach
/// back into worker management; cross-session tools hold a `Weak` handle
/// instead.
pub struct RuntimeHandle {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionStore>,
    pub log: Arc<MessageLog>,
    pub providers: Arc<ProviderRegistry>,
    pub tools: Arc<ToolRegistry>,
    pub bus: Arc<EventBus>,
    pub channels: Arc<ChannelRegistry>,
}

/// Shared application state handed to API handlers and background loops.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<RuntimeHandle>,
    pub registry: Arc<SessionRegistry>,
    pub cron: Arc<CronStore>,
    pub browser: Arc<BrowserController>,
    pub memory: Arc<dyn MemoryBackend>,
    pub processes: Arc<ProcessManager>,
}
