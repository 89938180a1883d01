//! Tool registry.
//!
//! Populated once at startup; read-only at runtime. Lookup and filtering
//! are pure; execution isolates the tool in its own task so a panicking
//! implementation becomes `Err(Crashed)` instead of taking the loop down.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use sb_domain::error::{Error, Result};
use sb_domain::message::ToolDefinition;

use crate::tool::{valid_tool_name, Tool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Duplicate or malformed names are rejected.
    pub fn register(&self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_owned();
        if !valid_tool_name(&name) {
            return Err(Error::Config(format!(
                "invalid tool name '{name}' (alphanumeric and underscore only)"
            )));
        }
        let mut tools = self.tools.write();
        if tools.contains_key(&name) {
            return Err(Error::Config(format!("duplicate tool name '{name}'")));
        }
        tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.read().get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().is_empty()
    }

    /// Descriptors for the tools the `allow` globs match minus `deny`
    /// names, sorted by name. An empty `allow` set matches everything.
    pub fn definitions(&self, allow: &[String], deny: &[String]) -> Vec<ToolDefinition> {
        let patterns: Vec<glob::Pattern> = allow
            .iter()
            .filter_map(|a| glob::Pattern::new(a).ok())
            .collect();

        let mut defs: Vec<ToolDefinition> = self
            .tools
            .read()
            .values()
            .filter(|t| {
                patterns.is_empty() || patterns.iter().any(|p| p.matches(t.name()))
            })
            .filter(|t| !deny.iter().any(|d| d == t.name()))
            .map(|t| ToolDefinition {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                parameters: t.parameters(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name.
    ///
    /// Unknown names yield `ToolNotFound`; a panicking implementation is
    /// contained in its own task and reported as `Crashed`.
    pub async fn execute(&self, name: &str, params: Value, ctx: &ToolContext) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::ToolNotFound(name.to_owned()))?;

        let ctx = ctx.clone();
        let handle = tokio::spawn(async move { tool.execute(params, &ctx).await });

        match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                let reason = if join_err.is_panic() {
                    "tool panicked".to_owned()
                } else {
                    join_err.to_string()
                };
                tracing::error!(tool = name, %reason, "tool execution crashed");
                Err(Error::Crashed(reason))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the input back."
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(params)
        }
    }

    struct PanicTool;

    #[async_trait::async_trait]
    impl Tool for PanicTool {
        fn name(&self) -> &str {
            "boom"
        }
        fn description(&self) -> &str {
            "Always panics."
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {}})
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
            panic!("kaboom");
        }
    }

    struct NamedTool(&'static str);

    #[async_trait::async_trait]
    impl Tool for NamedTool {
        fn name(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "test"
        }
        fn parameters(&self) -> Value {
            serde_json::json!({"type": "object"})
        }
        async fn execute(&self, _params: Value, _ctx: &ToolContext) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn malformed_names_are_rejected() {
        let registry = ToolRegistry::new();
        let err = registry.register(Arc::new(NamedTool("bad.name"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn definitions_filter_by_allow_globs_and_deny() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("fs_read"))).unwrap();
        registry.register(Arc::new(NamedTool("fs_write"))).unwrap();
        registry.register(Arc::new(NamedTool("shell"))).unwrap();

        let defs = registry.definitions(&["fs_*".into()], &[]);
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["fs_read", "fs_write"]);

        let defs = registry.definitions(&["*".into()], &["shell".into()]);
        assert!(!defs.iter().any(|d| d.name == "shell"));
        assert_eq!(defs.len(), 2);
    }

    #[test]
    fn definitions_are_sorted() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(NamedTool("zeta"))).unwrap();
        registry.register(Arc::new(NamedTool("alpha"))).unwrap();
        let defs = registry.definitions(&["*".into()], &[]);
        assert_eq!(defs[0].name, "alpha");
        assert_eq!(defs[1].name, "zeta");
    }

    #[tokio::test]
    async fn execute_unknown_name_is_tool_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("ghost", Value::Null, &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(name) if name == "ghost"));
    }

    #[tokio::test]
    async fn execute_round_trips_params() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        let out = registry
            .execute(
                "echo",
                serde_json::json!({"k": 1}),
                &ToolContext::default(),
            )
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"k": 1}));
    }

    #[tokio::test]
    async fn panicking_tool_is_contained_as_crashed() {
        let registry = ToolRegistry::new();
        registry.register(Arc::new(PanicTool)).unwrap();
        let err = registry
            .execute("boom", Value::Null, &ToolContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Crashed(_)));
    }
}
