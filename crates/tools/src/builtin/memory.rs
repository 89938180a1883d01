//! Memory tools — search and store against the configured backend.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use sb_domain::error::{Error, Result};
use sb_memory::{MemoryBackend, MemoryType, SearchOptions, StoreOptions};

use crate::tool::{Tool, ToolContext};

fn parse_kind(raw: Option<&str>) -> Result<Option<MemoryType>> {
    match raw {
        None => Ok(None),
        Some("episodic") => Ok(Some(MemoryType::Episodic)),
        Some("semantic") => Ok(Some(MemoryType::Semantic)),
        Some("procedural") => Ok(Some(MemoryType::Procedural)),
        Some(other) => Err(Error::parse(
            "tool_args",
            format!("unknown memory type '{other}'"),
        )),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// memory_search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct SearchParams {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    min_score: Option<f32>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

pub struct MemorySearchTool {
    backend: Arc<dyn MemoryBackend>,
}

impl MemorySearchTool {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl Tool for MemorySearchTool {
    fn name(&self) -> &str {
        "memory_search"
    }

    fn description(&self) -> &str {
        "Search long-term memory for relevant facts, notes, and history."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" },
                "limit": { "type": "integer", "description": "Max results (default 10)" },
                "min_score": { "type": "number", "description": "Minimum relevance score" },
                "type": {
                    "type": "string",
                    "enum": ["episodic", "semantic", "procedural"],
                    "description": "Restrict to one memory type"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let req: SearchParams = serde_json::from_value(params)
            .map_err(|e| Error::parse("tool_args", e))?;

        let opts = SearchOptions {
            limit: req.limit,
            min_score: req.min_score,
            kind: parse_kind(req.kind.as_deref())?,
            source: None,
        };
        let entries = self.backend.search(&req.query, opts).await?;
        Ok(json!({"count": entries.len(), "entries": entries}))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// memory_store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct StoreParams {
    content: String,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

pub struct MemoryStoreTool {
    backend: Arc<dyn MemoryBackend>,
}

impl MemoryStoreTool {
    pub fn new(backend: Arc<dyn MemoryBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait::async_trait]
impl Tool for MemoryStoreTool {
    fn name(&self) -> &str {
        "memory_store"
    }

    fn description(&self) -> &str {
        "Store a fact or note in long-term memory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Content to remember" },
                "type": {
                    "type": "string",
                    "enum": ["episodic", "semantic", "procedural"],
                    "description": "Memory type (default semantic)"
                },
                "source": { "type": "string", "description": "Source label" }
            },
            "required": ["content"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value> {
        let req: StoreParams = serde_json::from_value(params)
            .map_err(|e| Error::parse("tool_args", e))?;

        let opts = StoreOptions {
            kind: parse_kind(req.kind.as_deref())?,
            source: req.source.or_else(|| Some(ctx.session_key.clone())),
            metadata: None,
        };
        let entry = self.backend.store(&req.content, opts).await?;
        Ok(json!({"id": entry.id, "stored": true}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_memory::LocalMemory;

    #[tokio::test]
    async fn store_then_search_through_tools() {
        let backend = Arc::new(LocalMemory::new());
        let store = MemoryStoreTool::new(backend.clone());
        let search = MemorySearchTool::new(backend);

        let ctx = ToolContext {
            session_key: "telegram:42".into(),
            ..Default::default()
        };
        store
            .execute(json!({"content": "the staging database lives on db2"}), &ctx)
            .await
            .unwrap();

        let out = search
            .execute(json!({"query": "staging database"}), &ctx)
            .await
            .unwrap();
        assert_eq!(out["count"], 1);
        assert!(out["entries"][0]["content"]
            .as_str()
            .unwrap()
            .contains("db2"));
        // Source defaults to the calling session key.
        assert_eq!(out["entries"][0]["source"], "telegram:42");
    }

    #[tokio::test]
    async fn unknown_type_is_rejected() {
        let backend = Arc::new(LocalMemory::new());
        let search = MemorySearchTool::new(backend);
        let err = search
            .execute(
                json!({"query": "x", "type": "quantum"}),
                &ToolContext::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }
}
