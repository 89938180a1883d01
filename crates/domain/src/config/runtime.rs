use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent loop / session runtime configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Wall-clock budget for one run. Overridable per call.
    #[serde(default = "d_run_timeout_secs")]
    pub run_timeout_secs: u64,

    /// Upper bound on consecutive infer → tools → infer cycles per run.
    /// A capped run terminates with a sentinel message, not an error.
    #[serde(default = "d_max_tool_iterations")]
    pub max_tool_iterations: u32,

    /// How many trailing persisted messages are loaded on run preparation.
    #[serde(default = "d_history_limit")]
    pub history_limit: usize,

    /// Deadline for a single tool execution inside the parallel dispatcher.
    #[serde(default = "d_tool_timeout_secs")]
    pub tool_timeout_secs: u64,

    /// How long `sessions_send` waits for the target session's reply.
    #[serde(default = "d_sessions_send_timeout_secs")]
    pub sessions_send_timeout_secs: u64,

    /// Sessions idle longer than this have their workers stopped (the
    /// persisted session survives and restarts on the next message).
    /// `0` disables reaping.
    #[serde(default = "d_idle_minutes")]
    pub idle_minutes: u64,

    /// System prompt prepended to every run.
    #[serde(default = "d_system_prompt")]
    pub system_prompt: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            run_timeout_secs: d_run_timeout_secs(),
            max_tool_iterations: d_max_tool_iterations(),
            history_limit: d_history_limit(),
            tool_timeout_secs: d_tool_timeout_secs(),
            sessions_send_timeout_secs: d_sessions_send_timeout_secs(),
            idle_minutes: d_idle_minutes(),
            system_prompt: d_system_prompt(),
        }
    }
}

fn d_run_timeout_secs() -> u64 {
    600
}

fn d_max_tool_iterations() -> u32 {
    50
}

fn d_history_limit() -> usize {
    100
}

fn d_tool_timeout_secs() -> u64 {
    60
}

fn d_sessions_send_timeout_secs() -> u64 {
    120
}

fn d_idle_minutes() -> u64 {
    240
}

fn d_system_prompt() -> String {
    "You are a helpful assistant with access to tools. \
     Use them when they help you answer."
        .into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.run_timeout_secs, 600);
        assert_eq!(cfg.max_tool_iterations, 50);
        assert_eq!(cfg.history_limit, 100);
        assert_eq!(cfg.tool_timeout_secs, 60);
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: RuntimeConfig = toml::from_str("run_timeout_secs = 5").unwrap();
        assert_eq!(cfg.run_timeout_secs, 5);
        assert_eq!(cfg.max_tool_iterations, 50);
    }
}
