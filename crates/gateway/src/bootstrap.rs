//! AppState construction and background-task spawning.

use std::sync::Arc;

use anyhow::Context;

use sb_browser::BrowserController;
use sb_domain::config::{Config, ConfigSeverity};
use sb_memory::{LocalMemory, MemoryBackend};
use sb_providers::{EnvCredentials, ProviderRegistry};
use sb_sessions::{MessageLog, SessionStore};
use sb_tools::builtin::{
    BrowserTool, FsListTool, FsReadTool, FsWriteTool, MemorySearchTool, MemoryStoreTool,
    ProcessTool, ShellTool, WebFetchTool,
};
use sb_tools::{ProcessManager, ToolRegistry};

use crate::bus::EventBus;
use crate::channels::ChannelRegistry;
use crate::cron::{CronRunner, CronStore};
use crate::runtime::session_tools::{CronTool, SessionsSendTool, SessionsSpawnTool};
use crate::runtime::SessionRegistry;
use crate::state::{AppState, RuntimeHandle};

/// Validate config, build every subsystem, and return the wired state.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Persistence ──────────────────────────────────────────────────
    let sessions =
        Arc::new(SessionStore::open(&config.state.path).context("opening session store")?);
    let log = Arc::new(MessageLog::open(&config.state.path).context("opening message log")?);

    // ── LLM providers ────────────────────────────────────────────────
    let credentials = Arc::new(EnvCredentials::from_config(&config.llm));
    let providers = Arc::new(ProviderRegistry::from_config(&config.llm, credentials));
    if providers.is_empty() {
        tracing::warn!("no LLM providers initialized; sessions cannot run inference");
    } else {
        tracing::info!(providers = providers.len(), "LLM provider registry ready");
    }

    // ── Bus & channels ───────────────────────────────────────────────
    let bus = Arc::new(EventBus::new());
    let channels = Arc::new(ChannelRegistry::new());

    // ── Tool subsystems ──────────────────────────────────────────────
    let processes = Arc::new(ProcessManager::new(config.tools.exec.clone()));
    let memory: Arc<dyn MemoryBackend> = Arc::new(LocalMemory::new());
    let browser = Arc::new(BrowserController::new(config.browser.clone()));

    std::fs::create_dir_all(&config.workspace.root).context("creating workspace root")?;
    let workspace_root = config
        .workspace
        .root
        .canonicalize()
        .context("resolving workspace root")?;

    let tools = Arc::new(ToolRegistry::new());
    tools
        .register(Arc::new(FsReadTool::new(workspace_root.clone())))
        .and_then(|_| tools.register(Arc::new(FsWriteTool::new(workspace_root.clone()))))
        .and_then(|_| tools.register(Arc::new(FsListTool::new(workspace_root))))
        .and_then(|_| tools.register(Arc::new(ShellTool::new(processes.clone()))))
        .and_then(|_| tools.register(Arc::new(ProcessTool::new(processes.clone()))))
        .and_then(|_| tools.register(Arc::new(WebFetchTool::new(config.tools.web.clone()))))
        .and_then(|_| tools.register(Arc::new(MemorySearchTool::new(memory.clone()))))
        .and_then(|_| tools.register(Arc::new(MemoryStoreTool::new(memory.clone()))))
        .and_then(|_| tools.register(Arc::new(BrowserTool::new(browser.clone()))))
        .context("registering built-in tools")?;

    // ── Runtime & sessions ───────────────────────────────────────────
    let runtime = Arc::new(RuntimeHandle {
        config: config.clone(),
        sessions,
        log,
        providers,
        tools: tools.clone(),
        bus,
        channels,
    });
    let registry = SessionRegistry::new(runtime.clone());

    // ── Cron ─────────────────────────────────────────────────────────
    let cron = Arc::new(
        CronStore::open(&config.state.path, &config.cron.timezone)
            .context("opening cron store")?,
    );

    // ── Cross-cutting tools (Weak handles avoid a startup cycle) ─────
    let send_timeout =
        std::time::Duration::from_secs(config.runtime.sessions_send_timeout_secs);
    tools
        .register(Arc::new(SessionsSendTool::new(
            Arc::downgrade(&registry),
            send_timeout,
        )))
        .and_then(|_| {
            tools.register(Arc::new(SessionsSpawnTool::new(Arc::downgrade(&registry))))
        })
        .and_then(|_| tools.register(Arc::new(CronTool::new(cron.clone()))))
        .context("registering session tools")?;

    tracing::info!(tools = tools.len(), "tool registry ready");

    Ok(AppState {
        runtime,
        registry,
        cron,
        browser,
        memory,
        processes,
    })
}

/// Spawn the maintenance loop: cron ticks, idle-worker reaping, process
/// cleanup, bus pruning, and session-store flushing.
pub fn spawn_background(state: AppState) -> tokio::task::JoinHandle<()> {
    let runner = CronRunner::new(state.clone());
    let tick = std::time::Duration::from_secs(state.runtime.config.cron.tick_secs);
    let idle_minutes = state.runtime.config.runtime.idle_minutes;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tick);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            runner.tick().await;

            if idle_minutes > 0 {
                state
                    .registry
                    .prune_idle(std::time::Duration::from_secs(idle_minutes * 60));
            }
            state.processes.cleanup_stale();
            state.runtime.bus.prune();
            if let Err(e) = state.runtime.sessions.flush() {
                tracing::warn!(error = %e, "session store flush failed");
            }
        }
    })
}
