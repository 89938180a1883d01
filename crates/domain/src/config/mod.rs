mod browser;
mod chunker;
mod cron;
mod llm;
mod runtime;
mod server;
mod tools;

pub use browser::*;
pub use chunker::*;
pub use cron::*;
pub use llm::*;
pub use runtime::*;
pub use server::*;
pub use tools::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub cron: CronConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load and parse a TOML config file.
    pub fn load(path: &std::path::Path) -> crate::error::Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(crate::error::Error::Io)?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> crate::error::Result<Self> {
        toml::from_str(raw).map_err(|e| crate::error::Error::Config(e.to_string()))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State & workspace paths
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where persisted runtime state lives (session rows, message logs, cron
/// jobs and run records).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "d_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: d_state_path(),
        }
    }
}

fn d_state_path() -> PathBuf {
    PathBuf::from("./data/state")
}

/// Root directory the file tools are confined to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "d_workspace_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: d_workspace_root(),
        }
    }
}

fn d_workspace_root() -> PathBuf {
    PathBuf::from("./workspace")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Observability
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_format: LogFormat,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

fn issue(severity: ConfigSeverity, field: &str, message: impl Into<String>) -> ConfigIssue {
    ConfigIssue {
        severity,
        field: field.to_owned(),
        message: message.into(),
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.llm.providers.is_empty() {
            issues.push(issue(
                ConfigSeverity::Warning,
                "llm.providers",
                "no LLM providers configured; sessions cannot run inference",
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for p in &self.llm.providers {
            if !seen.insert(p.id.as_str()) {
                issues.push(issue(
                    ConfigSeverity::Error,
                    "llm.providers",
                    format!("duplicate provider id '{}'", p.id),
                ));
            }
            if p.auth_env.is_empty() {
                issues.push(issue(
                    ConfigSeverity::Error,
                    "llm.providers",
                    format!("provider '{}' has an empty auth_env", p.id),
                ));
            }
        }

        if let Some(ref default) = self.llm.default_provider {
            if !self.llm.providers.iter().any(|p| &p.id == default) {
                issues.push(issue(
                    ConfigSeverity::Error,
                    "llm.default_provider",
                    format!("'{default}' does not name a configured provider"),
                ));
            }
        }

        if self.runtime.max_tool_iterations == 0 {
            issues.push(issue(
                ConfigSeverity::Error,
                "runtime.max_tool_iterations",
                "must be at least 1",
            ));
        }
        if self.runtime.run_timeout_secs == 0 {
            issues.push(issue(
                ConfigSeverity::Error,
                "runtime.run_timeout_secs",
                "must be non-zero",
            ));
        }

        if self.chunker.min_chars > self.chunker.max_chars {
            issues.push(issue(
                ConfigSeverity::Warning,
                "chunker",
                "min_chars exceeds max_chars; max_chars will be raised at runtime",
            ));
        }

        if self.cron.tick_secs == 0 {
            issues.push(issue(
                ConfigSeverity::Error,
                "cron.tick_secs",
                "must be non-zero",
            ));
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_parses_with_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.runtime.max_tool_iterations, 50);
        assert_eq!(cfg.chunker.min_chars, 200);
        assert_eq!(cfg.cron.tick_secs, 30);
        assert!(cfg.llm.providers.is_empty());
    }

    #[test]
    fn validate_flags_duplicate_provider_ids() {
        let cfg = Config::from_toml(
            r#"
            [[llm.providers]]
            id = "main"
            kind = "anthropic"
            auth_env = "KEY_A"

            [[llm.providers]]
            id = "main"
            kind = "openai"
            auth_env = "KEY_B"
            "#,
        )
        .unwrap();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("duplicate")));
    }

    #[test]
    fn validate_flags_unknown_default_provider() {
        let cfg = Config::from_toml(
            r#"
            [llm]
            default_provider = "ghost"
            "#,
        )
        .unwrap();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "llm.default_provider"
                && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn validate_flags_inverted_chunker_bounds() {
        let cfg = Config::from_toml(
            r#"
            [chunker]
            min_chars = 900
            max_chars = 100
            "#,
        )
        .unwrap();
        let issues = cfg.validate();
        assert!(issues.iter().any(|i| i.field == "chunker"));
    }

    #[test]
    fn issue_display_includes_severity_tag() {
        let i = issue(ConfigSeverity::Error, "llm", "bad");
        assert_eq!(i.to_string(), "[ERROR] llm: bad");
    }
}
