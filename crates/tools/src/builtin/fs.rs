//! File tools — workspace-rooted, auditable file I/O.
//!
//! Every path is validated against the workspace root: absolute paths and
//! `..` components are rejected up front, then the resolved path must stay
//! inside the canonicalized root.

use std::path::{Component, Path, PathBuf};

use serde::Deserialize;
use serde_json::{json, Value};

use sb_domain::error::{Error, Result};

use crate::tool::{Tool, ToolContext};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Path validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a requested path and resolve it inside the workspace root.
pub fn validate_path(root: &Path, requested: &str) -> Result<PathBuf> {
    let requested_path = Path::new(requested);
    if requested_path.is_absolute() {
        return Err(Error::Other(format!(
            "absolute paths are not allowed; use a path relative to the workspace (got '{requested}')"
        )));
    }
    for component in requested_path.components() {
        if matches!(component, Component::ParentDir) {
            return Err(Error::Other(
                "path must not contain '..' components".into(),
            ));
        }
    }

    let canonical_root = root.canonicalize().map_err(|e| {
        Error::Other(format!("cannot resolve workspace root '{}': {e}", root.display()))
    })?;
    let candidate = canonical_root.join(requested_path);

    // Canonicalize the nearest existing ancestor, then re-append the
    // non-existing tail, and check containment.
    let resolved = if candidate.exists() {
        candidate
            .canonicalize()
            .map_err(|e| Error::Other(format!("cannot resolve '{}': {e}", candidate.display())))?
    } else {
        let mut existing = candidate.as_path();
        let mut tail: Vec<&std::ffi::OsStr> = Vec::new();
        while !existing.exists() {
            match (existing.file_name(), existing.parent()) {
                (Some(name), Some(parent)) => {
                    tail.push(name);
                    existing = parent;
                }
                _ => break,
            }
        }
        let mut resolved = existing.canonicalize().map_err(|e| {
            Error::Other(format!("cannot resolve ancestor of '{}': {e}", candidate.display()))
        })?;
        for part in tail.into_iter().rev() {
            resolved.push(part);
        }
        resolved
    };

    if !resolved.starts_with(&canonical_root) {
        return Err(Error::Other(format!(
            "path '{requested}' resolves outside the workspace root"
        )));
    }
    Ok(resolved)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs_read
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ReadParams {
    path: String,
    #[serde(default)]
    offset: Option<usize>,
    #[serde(default)]
    limit: Option<usize>,
}

pub struct FsReadTool {
    root: PathBuf,
}

impl FsReadTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait::async_trait]
impl Tool for FsReadTool {
    fn name(&self) -> &str {
        "fs_read"
    }

    fn description(&self) -> &str {
        "Read a file from the workspace, optionally a line range."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "offset": { "type": "integer", "description": "First line to return (0-indexed)" },
                "limit": { "type": "integer", "description": "Maximum number of lines" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let req: ReadParams = serde_json::from_value(params)
            .map_err(|e| Error::parse("tool_args", e))?;
        let path = validate_path(&self.root, &req.path)?;

        let content = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| Error::Other(format!("failed to read '{}': {e}", req.path)))?;

        let lines: Vec<&str> = content.lines().collect();
        let total_lines = lines.len();
        let offset = req.offset.unwrap_or(0);
        let limit = req.limit.unwrap_or(total_lines.saturating_sub(offset));
        let selected: Vec<&str> = lines.into_iter().skip(offset).take(limit).collect();

        Ok(json!({
            "path": req.path,
            "content": selected.join("\n"),
            "total_lines": total_lines,
            "offset": offset,
            "lines_returned": selected.len(),
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs_write
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct WriteParams {
    path: String,
    content: String,
    #[serde(default)]
    append: bool,
}

pub struct FsWriteTool {
    root: PathBuf,
}

impl FsWriteTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait::async_trait]
impl Tool for FsWriteTool {
    fn name(&self) -> &str {
        "fs_write"
    }

    fn description(&self) -> &str {
        "Write or append to a file in the workspace, creating parent directories."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Path relative to the workspace root" },
                "content": { "type": "string", "description": "Content to write" },
                "append": { "type": "boolean", "description": "Append instead of overwrite" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let req: WriteParams = serde_json::from_value(params)
            .map_err(|e| Error::parse("tool_args", e))?;
        let path = validate_path(&self.root, &req.path)?;

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Other(format!("creating parent dirs: {e}")))?;
        }

        if req.append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .await
                .map_err(|e| Error::Other(format!("opening '{}': {e}", req.path)))?;
            file.write_all(req.content.as_bytes())
                .await
                .map_err(|e| Error::Other(format!("appending '{}': {e}", req.path)))?;
        } else {
            // Atomic overwrite: write a sibling temp file, then rename.
            let tmp = path.with_extension("tmp-write");
            tokio::fs::write(&tmp, req.content.as_bytes())
                .await
                .map_err(|e| Error::Other(format!("writing '{}': {e}", req.path)))?;
            tokio::fs::rename(&tmp, &path)
                .await
                .map_err(|e| Error::Other(format!("renaming into '{}': {e}", req.path)))?;
        }

        Ok(json!({
            "path": req.path,
            "bytes_written": req.content.len(),
            "appended": req.append,
        }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// fs_list
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default = "default_dot")]
    path: String,
}

fn default_dot() -> String {
    ".".into()
}

pub struct FsListTool {
    root: PathBuf,
}

impl FsListTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait::async_trait]
impl Tool for FsListTool {
    fn name(&self) -> &str {
        "fs_list"
    }

    fn description(&self) -> &str {
        "List a workspace directory."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Directory relative to the workspace root" }
            }
        })
    }

    async fn execute(&self, params: Value, _ctx: &ToolContext) -> Result<Value> {
        let req: ListParams = serde_json::from_value(params)
            .map_err(|e| Error::parse("tool_args", e))?;
        let path = validate_path(&self.root, &req.path)?;

        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(&path)
            .await
            .map_err(|e| Error::Other(format!("failed to list '{}': {e}", req.path)))?;
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| Error::Other(e.to_string()))?
        {
            let meta = entry.metadata().await.ok();
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "is_dir": meta.as_ref().map(|m| m.is_dir()).unwrap_or(false),
                "size": meta.as_ref().map(|m| m.len()).unwrap_or(0),
            }));
        }
        entries.sort_by(|a, b| {
            a["name"]
                .as_str()
                .unwrap_or("")
                .cmp(b["name"].as_str().unwrap_or(""))
        });

        Ok(json!({"path": req.path, "entries": entries}))
    }
}
