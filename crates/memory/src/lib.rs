//! Long-term memory backend contract.
//!
//! The runtime talks to memory through [`MemoryBackend`] behind an
//! `Arc<dyn …>`; concrete remote backends (vector stores, external memory
//! services) live outside this repository. [`LocalMemory`] is the in-process
//! default: a naive token-overlap index that keeps the tool surface honest
//! without any external service.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use sb_domain::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    #[default]
    Semantic,
    Episodic,
    Procedural,
}

/// One stored memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub id: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MemoryType,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    /// Relevance score attached by `search`; absent on raw reads.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub min_score: Option<f32>,
    pub kind: Option<MemoryType>,
    pub source: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct StoreOptions {
    pub kind: Option<MemoryType>,
    pub source: Option<String>,
    pub metadata: Option<HashMap<String, serde_json::Value>>,
}

/// A conversation turn handed to `store_messages`.
#[derive(Debug, Clone)]
pub struct MemoryMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryHealth {
    pub ok: bool,
    pub backend: String,
    pub entries: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Backend trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait MemoryBackend: Send + Sync {
    async fn search(&self, query: &str, opts: SearchOptions) -> Result<Vec<MemoryEntry>>;

    async fn store(&self, content: &str, opts: StoreOptions) -> Result<MemoryEntry>;

    /// Store a batch of conversation turns as episodic memory.
    async fn store_messages(
        &self,
        messages: &[MemoryMessage],
        opts: StoreOptions,
    ) -> Result<Vec<MemoryEntry>>;

    async fn delete(&self, id: &str) -> Result<bool>;

    /// Delete every entry with the given source label; returns the count.
    async fn delete_by_source(&self, source: &str) -> Result<usize>;

    async fn health(&self) -> Result<MemoryHealth>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Local in-process backend
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Naive in-memory backend: lowercase token overlap scoring.
#[derive(Default)]
pub struct LocalMemory {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl LocalMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_owned)
        .collect()
}

fn overlap_score(query_tokens: &[String], content: &str) -> f32 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let content_tokens = tokenize(content);
    let hits = query_tokens
        .iter()
        .filter(|t| content_tokens.contains(t))
        .count();
    hits as f32 / query_tokens.len() as f32
}

#[async_trait::async_trait]
impl MemoryBackend for LocalMemory {
    async fn search(&self, query: &str, opts: SearchOptions) -> Result<Vec<MemoryEntry>> {
        let query_tokens = tokenize(query);
        let limit = opts.limit.unwrap_or(10);
        let min_score = opts.min_score.unwrap_or(0.0);

        let mut scored: Vec<MemoryEntry> = self
            .entries
            .read()
            .iter()
            .filter(|e| opts.kind.map_or(true, |k| e.kind == k))
            .filter(|e| {
                opts.source
                    .as_deref()
                    .map_or(true, |s| e.source.as_deref() == Some(s))
            })
            .filter_map(|e| {
                let score = overlap_score(&query_tokens, &e.content);
                if score > 0.0 && score >= min_score {
                    let mut hit = e.clone();
                    hit.score = Some(score);
                    Some(hit)
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn store(&self, content: &str, opts: StoreOptions) -> Result<MemoryEntry> {
        let now = Utc::now();
        let entry = MemoryEntry {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_owned(),
            kind: opts.kind.unwrap_or_default(),
            source: opts.source,
            metadata: opts.metadata.unwrap_or_default(),
            score: None,
            created_at: now,
            updated_at: now,
        };
        self.entries.write().push(entry.clone());
        Ok(entry)
    }

    async fn store_messages(
        &self,
        messages: &[MemoryMessage],
        opts: StoreOptions,
    ) -> Result<Vec<MemoryEntry>> {
        let mut stored = Vec::with_capacity(messages.len());
        for msg in messages {
            let mut per_msg = opts.clone();
            per_msg.kind = Some(opts.kind.unwrap_or(MemoryType::Episodic));
            let content = format!("{}: {}", msg.role, msg.content);
            stored.push(self.store(&content, per_msg).await?);
        }
        Ok(stored)
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < before)
    }

    async fn delete_by_source(&self, source: &str) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.source.as_deref() != Some(source));
        Ok(before - entries.len())
    }

    async fn health(&self) -> Result<MemoryHealth> {
        Ok(MemoryHealth {
            ok: true,
            backend: "local".into(),
            entries: self.entries.read().len(),
        })
    }
}
