use serde_json::Value;

use sb_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool contract
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Identifiers the loop passes to every tool execution.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub session_id: String,
    pub session_key: String,
    pub run_id: String,
    pub agent_id: Option<String>,
    /// Channel label of the owning session, when it has one.
    pub channel: Option<String>,
}

/// Uniform capability contract.
///
/// `execute` receives the raw parameter object — unknown fields pass
/// through, tools validate their own inputs. The returned value is any
/// JSON-serializable payload; the dispatcher serializes it into the tool
/// message. Errors are folded back into the conversation, never raised.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    /// Unique name; alphanumeric and underscore only.
    fn name(&self) -> &str;

    /// Prose for the model.
    fn description(&self) -> &str;

    /// JSON Schema (object form) for the parameters.
    fn parameters(&self) -> Value;

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value>;
}

/// Whether a name is acceptable for registration.
pub fn valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!(valid_tool_name("shell"));
        assert!(valid_tool_name("fs_read"));
        assert!(valid_tool_name("tool2"));
    }

    #[test]
    fn invalid_names() {
        assert!(!valid_tool_name(""));
        assert!(!valid_tool_name("web.fetch"));
        assert!(!valid_tool_name("spaced name"));
        assert!(!valid_tool_name("dash-name"));
    }
}
