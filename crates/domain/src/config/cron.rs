use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cron executor configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronConfig {
    /// Scheduler evaluation interval (seconds).
    #[serde(default = "d_tick_secs")]
    pub tick_secs: u64,

    /// Per-run timeout applied when a job does not set one (seconds).
    #[serde(default = "d_default_timeout_secs")]
    pub default_timeout_secs: u64,

    /// IANA timezone the 5-field expressions are evaluated in.
    #[serde(default = "d_timezone")]
    pub timezone: String,
}

impl Default for CronConfig {
    fn default() -> Self {
        Self {
            tick_secs: d_tick_secs(),
            default_timeout_secs: d_default_timeout_secs(),
            timezone: d_timezone(),
        }
    }
}

fn d_tick_secs() -> u64 {
    30
}

fn d_default_timeout_secs() -> u64 {
    300
}

fn d_timezone() -> String {
    "UTC".into()
}
