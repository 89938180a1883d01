//! Parallel tool dispatch.
//!
//! All pending tool calls of one cycle run concurrently; results come back
//! in call order. Every failure mode — unknown tool, tool error, deadline,
//! panic — is serialized into a tool-result string so the model can react;
//! nothing here aborts the run.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::Instrument;

use sb_domain::message::ToolCall;
use sb_tools::{ToolContext, ToolRegistry};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Outcome of one dispatched tool call, in serialized form.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub call_id: String,
    /// The tool's real (un-remapped) name.
    pub name: String,
    pub content: String,
    pub is_error: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Argument normalization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalize model-supplied arguments to an object.
///
/// Providers deliver arguments as a structured map, as a string containing
/// JSON, or not at all; the tool always sees the same shape. A string that
/// fails to parse (or parses to a non-object) becomes an empty object.
pub fn normalize_arguments(raw: &Value) -> Value {
    match raw {
        Value::Object(_) => raw.clone(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(Value::Object(map)) => Value::Object(map),
            _ => Value::Object(Default::default()),
        },
        _ => Value::Object(Default::default()),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Serialize a tool's payload into the tool-message content.
fn payload_to_content(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => serde_json::to_string_pretty(&other).unwrap_or_else(|_| other.to_string()),
    }
}

/// Dispatch all calls concurrently with a per-tool deadline.
///
/// `unmap` reverses a vendor tool-name remap (advertised name → real name)
/// before lookup; outcomes carry the real name.
pub async fn dispatch_all(
    tools: &Arc<ToolRegistry>,
    calls: &[ToolCall],
    ctx: &ToolContext,
    per_tool_timeout: Duration,
    unmap: Option<&HashMap<String, String>>,
) -> Vec<ToolOutcome> {
    let futures: Vec<_> = calls
        .iter()
        .map(|call| {
            let tools = tools.clone();
            let ctx = ctx.clone();
            let name = unmap
                .and_then(|m| m.get(&call.name).cloned())
                .unwrap_or_else(|| call.name.clone());
            let call_id = call.id.clone();
            let arguments = normalize_arguments(&call.arguments);
            let span = tracing::info_span!("tool.call", tool = %name, call_id = %call_id);

            async move {
                let result = tokio::time::timeout(
                    per_tool_timeout,
                    tools.execute(&name, arguments, &ctx),
                )
                .await;

                let (content, is_error) = match result {
                    Ok(Ok(value)) => (payload_to_content(value), false),
                    Ok(Err(e)) => (format!("Error: {e}"), true),
                    Err(_) => ("Error: timeout".to_owned(), true),
                };
                ToolOutcome {
                    call_id,
                    name,
                    content,
                    is_error,
                }
            }
            .instrument(span)
        })
        .collect();

    futures_util::future::join_all(futures).await
}
