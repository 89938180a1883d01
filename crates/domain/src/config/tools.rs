use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Glob patterns of tool names exposed to the model.
    #[serde(default = "d_allow")]
    pub allow: Vec<String>,

    /// Tool names withheld from the model even when `allow` matches.
    #[serde(default)]
    pub deny: Vec<String>,

    #[serde(default)]
    pub exec: ExecConfig,

    #[serde(default)]
    pub web: WebFetchConfig,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            allow: d_allow(),
            deny: Vec::new(),
            exec: ExecConfig::default(),
            web: WebFetchConfig::default(),
        }
    }
}

fn d_allow() -> Vec<String> {
    vec!["*".into()]
}

// ── Shell execution ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecConfig {
    /// Hard timeout for a child process (seconds).
    #[serde(default = "d_exec_timeout_sec")]
    pub timeout_sec: u64,

    /// Foreground wait before auto-backgrounding (milliseconds).
    #[serde(default = "d_background_ms")]
    pub background_ms: u64,

    /// Bounded combined-output buffer per process.
    #[serde(default = "d_max_output_chars")]
    pub max_output_chars: usize,

    /// Finished process sessions older than this are evicted (milliseconds).
    #[serde(default = "d_cleanup_ms")]
    pub cleanup_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_sec: d_exec_timeout_sec(),
            background_ms: d_background_ms(),
            max_output_chars: d_max_output_chars(),
            cleanup_ms: d_cleanup_ms(),
        }
    }
}

fn d_exec_timeout_sec() -> u64 {
    300
}

fn d_background_ms() -> u64 {
    10_000
}

fn d_max_output_chars() -> usize {
    200_000
}

fn d_cleanup_ms() -> u64 {
    3_600_000
}

// ── Web fetch ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebFetchConfig {
    #[serde(default = "d_web_timeout_secs")]
    pub timeout_secs: u64,

    /// Maximum response body size in bytes.
    #[serde(default = "d_web_max_bytes")]
    pub max_bytes: usize,

    /// Maximum extracted-text size in characters.
    #[serde(default = "d_web_max_text_chars")]
    pub max_text_chars: usize,

    #[serde(default = "d_user_agent")]
    pub user_agent: String,
}

impl Default for WebFetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: d_web_timeout_secs(),
            max_bytes: d_web_max_bytes(),
            max_text_chars: d_web_max_text_chars(),
            user_agent: d_user_agent(),
        }
    }
}

fn d_web_timeout_secs() -> u64 {
    20
}

fn d_web_max_bytes() -> usize {
    5 * 1024 * 1024
}

fn d_web_max_text_chars() -> usize {
    250_000
}

fn d_user_agent() -> String {
    "Switchboard/0.1".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allow_is_wildcard() {
        let cfg = ToolsConfig::default();
        assert_eq!(cfg.allow, vec!["*".to_string()]);
        assert!(cfg.deny.is_empty());
    }

    #[test]
    fn exec_defaults() {
        let cfg = ExecConfig::default();
        assert_eq!(cfg.timeout_sec, 300);
        assert_eq!(cfg.background_ms, 10_000);
    }
}
