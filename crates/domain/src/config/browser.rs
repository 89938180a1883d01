use serde::{Deserialize, Serialize};
use std::path::PathBuf;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Browser controller configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrowserConfig {
    /// Chromium/Chrome executable override. When `None`, the controller
    /// relies on autodetection.
    #[serde(default)]
    pub executable: Option<PathBuf>,

    #[serde(default = "d_headless")]
    pub headless: bool,

    /// Navigation / operation deadline (seconds).
    #[serde(default = "d_nav_timeout_secs")]
    pub nav_timeout_secs: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            executable: None,
            headless: d_headless(),
            nav_timeout_secs: d_nav_timeout_secs(),
        }
    }
}

fn d_headless() -> bool {
    true
}

fn d_nav_timeout_secs() -> u64 {
    30
}
