use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM provider configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LlmConfig {
    /// Configured provider instances.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Provider used when a session does not name one. When `None`, the
    /// first successfully-initialized provider wins.
    #[serde(default)]
    pub default_provider: Option<String>,

    /// Tool-name remap tables keyed by model-identifier prefix.
    ///
    /// Some model identities require vendor-specific tool names (e.g. a
    /// fixed casing bound to an OAuth identity). The runtime applies the
    /// matching table before advertising tools and reverses it before
    /// dispatch. This is data, not code.
    #[serde(default)]
    pub tool_name_maps: HashMap<String, HashMap<String, String>>,
}

impl LlmConfig {
    /// Find the remap table whose key is a prefix of `model`, if any.
    pub fn tool_name_map_for(&self, model: &str) -> Option<&HashMap<String, String>> {
        self.tool_name_maps
            .iter()
            .filter(|(prefix, _)| model.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, map)| map)
    }
}

/// Which wire dialect a provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Google,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Unique instance id, referenced as `<id>/<model>` in model specs.
    pub id: String,
    pub kind: ProviderKind,

    /// API base URL. When empty, the dialect's default endpoint is used.
    #[serde(default)]
    pub base_url: String,

    /// Model used when a request does not name one.
    #[serde(default)]
    pub default_model: Option<String>,

    /// Environment variable the credential provider reads the secret from.
    #[serde(default = "d_auth_env")]
    pub auth_env: String,
}

fn d_auth_env() -> String {
    "SWITCHBOARD_API_KEY".into()
}

impl ProviderConfig {
    /// The effective base URL (config override or the dialect default).
    pub fn effective_base_url(&self) -> &str {
        if !self.base_url.is_empty() {
            return self.base_url.trim_end_matches('/');
        }
        match self.kind {
            ProviderKind::Anthropic => "https://api.anthropic.com",
            ProviderKind::Openai => "https://api.openai.com/v1",
            ProviderKind::Google => "https://generativelanguage.googleapis.com/v1beta",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg_with_maps() -> LlmConfig {
        let mut maps = HashMap::new();
        maps.insert(
            "claude-".to_string(),
            HashMap::from([("web_fetch".to_string(), "WebFetch".to_string())]),
        );
        maps.insert(
            "claude-sonnet".to_string(),
            HashMap::from([("web_fetch".to_string(), "FetchUrl".to_string())]),
        );
        LlmConfig {
            tool_name_maps: maps,
            ..Default::default()
        }
    }

    #[test]
    fn longest_prefix_wins() {
        let cfg = cfg_with_maps();
        let map = cfg.tool_name_map_for("claude-sonnet-4").unwrap();
        assert_eq!(map.get("web_fetch").unwrap(), "FetchUrl");
    }

    #[test]
    fn shorter_prefix_matches_other_models() {
        let cfg = cfg_with_maps();
        let map = cfg.tool_name_map_for("claude-opus-4").unwrap();
        assert_eq!(map.get("web_fetch").unwrap(), "WebFetch");
    }

    #[test]
    fn no_match_returns_none() {
        let cfg = cfg_with_maps();
        assert!(cfg.tool_name_map_for("gpt-4o").is_none());
    }

    #[test]
    fn effective_base_url_defaults_by_kind() {
        let p = ProviderConfig {
            id: "g".into(),
            kind: ProviderKind::Google,
            base_url: String::new(),
            default_model: None,
            auth_env: "K".into(),
        };
        assert!(p.effective_base_url().contains("generativelanguage"));
    }

    #[test]
    fn effective_base_url_strips_trailing_slash() {
        let p = ProviderConfig {
            id: "a".into(),
            kind: ProviderKind::Anthropic,
            base_url: "http://localhost:9999/".into(),
            default_model: None,
            auth_env: "K".into(),
        };
        assert_eq!(p.effective_base_url(), "http://localhost:9999");
    }
}
