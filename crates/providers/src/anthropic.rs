//! Anthropic-style adapter (Messages API).
//!
//! System turns move to the top-level `system` field, tool results travel as
//! user messages with `tool_result` content blocks, and streamed tool calls
//! arrive as indexed content blocks (`content_block_start` / `input_json_delta`
//! / `content_block_stop`).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use sb_domain::config::{ProviderConfig, ProviderKind};
use sb_domain::error::{Error, Result};
use sb_domain::message::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use sb_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::credentials::{identity_headers, CredentialKind, CredentialProvider};
use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{api_error, from_reqwest};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct AnthropicProvider {
    id: String,
    base_url: String,
    default_model: String,
    credentials: Arc<dyn CredentialProvider>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn from_config(
        cfg: &ProviderConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            id: cfg.id.clone(),
            base_url: cfg.effective_base_url().to_owned(),
            default_model: cfg
                .default_model
                .clone()
                .unwrap_or_else(|| "claude-sonnet-4-20250514".into()),
            credentials,
            client,
        })
    }

    /// Build a POST with auth resolved per call: API keys use `x-api-key`,
    /// bearer tokens use `Authorization` plus the vendor identity headers.
    fn authed_post(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        let cred = self.credentials.get(&self.id)?;
        let mut builder = self
            .client
            .post(url)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json");

        builder = match cred.kind {
            CredentialKind::ApiKey => builder.header("x-api-key", &cred.secret),
            CredentialKind::OauthBearer => {
                let mut b = builder.header("Authorization", format!("Bearer {}", cred.secret));
                for (name, value) in identity_headers(ProviderKind::Anthropic) {
                    b = b.header(*name, *value);
                }
                b
            }
        };
        Ok(builder)
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let mut system_parts: Vec<String> = Vec::new();
        let mut api_messages: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.all_text()),
                Role::User => api_messages.push(user_to_wire(msg)),
                Role::Assistant => api_messages.push(assistant_to_wire(msg)),
                // Tool results are user messages with tool_result blocks.
                Role::Tool => api_messages.push(tool_result_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({
            "model": model,
            "messages": api_messages,
            "max_tokens": req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if !system_parts.is_empty() {
            body["system"] = Value::String(system_parts.join("\n\n"));
        }
        if !req.tools.is_empty() {
            body["tools"] = Value::Array(req.tools.iter().map(tool_to_wire).collect());
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn user_to_wire(msg: &Message) -> Value {
    serde_json::json!({
        "role": "user",
        "content": msg.content.all_text(),
    })
}

fn assistant_to_wire(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Text(t) => vec![serde_json::json!({"type": "text", "text": t})],
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => {
                    Some(serde_json::json!({"type": "text", "text": text}))
                }
                ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                    "type": "tool_use",
                    "id": id,
                    "name": name,
                    "input": input,
                })),
                ContentPart::ToolResult { .. } => None,
            })
            .collect(),
    };
    serde_json::json!({"role": "assistant", "content": content})
}

fn tool_result_to_wire(msg: &Message) -> Value {
    let content: Vec<Value> = match &msg.content {
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|p| match p {
                ContentPart::ToolResult {
                    tool_use_id,
                    content,
                    is_error,
                } => Some(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": tool_use_id,
                    "content": content,
                    "is_error": is_error,
                })),
                _ => None,
            })
            .collect(),
        MessageContent::Text(t) => vec![serde_json::json!({
            "type": "tool_result",
            "tool_use_id": "",
            "content": t,
        })],
    };
    serde_json::json!({"role": "user", "content": content})
}

fn tool_to_wire(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "name": tool.name,
        "description": tool.description,
        "input_schema": tool.parameters,
    })
}

fn normalize_stop_reason(raw: &str) -> String {
    match raw {
        "end_turn" => "stop".to_string(),
        "tool_use" => "tool_calls".to_string(),
        other => other.to_string(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Tool-call assembly state across payloads: block index → (id, name, args).
struct SseState {
    blocks: HashMap<u64, (String, String, String)>,
    usage: Option<Usage>,
    done_seen: bool,
}

impl SseState {
    fn new() -> Self {
        Self {
            blocks: HashMap::new(),
            usage: None,
            done_seen: false,
        }
    }
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        input_tokens: v.get("input_tokens")?.as_u64()? as u32,
        output_tokens: v.get("output_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
    })
}

fn parse_payload(data: &str, state: &mut SseState) -> Vec<Result<StreamEvent>> {
    let mut events = Vec::new();

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            events.push(Err(Error::Json(e)));
            return events;
        }
    };

    match v.get("type").and_then(|t| t.as_str()).unwrap_or("") {
        "message_start" => {
            if let Some(msg) = v.get("message") {
                state.usage = msg.get("usage").and_then(parse_usage);
            }
        }

        "content_block_start" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(block) = v.get("content_block") {
                if block.get("type").and_then(|t| t.as_str()) == Some("tool_use") {
                    let id = block
                        .get("id")
                        .and_then(|x| x.as_str())
                        .unwrap_or("")
                        .to_owned();
                    let name = block
                        .get("name")
                        .and_then(|x| x.as_str())
                        .unwrap_or("")
                        .to_owned();
                    events.push(Ok(StreamEvent::ToolCallStarted {
                        id: id.clone(),
                        name: name.clone(),
                    }));
                    state.blocks.insert(idx, (id, name, String::new()));
                }
            }
        }

        "content_block_delta" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some(delta) = v.get("delta") {
                match delta.get("type").and_then(|t| t.as_str()).unwrap_or("") {
                    "text_delta" => {
                        if let Some(text) = delta.get("text").and_then(|t| t.as_str()) {
                            if !text.is_empty() {
                                events.push(Ok(StreamEvent::Token {
                                    text: text.to_owned(),
                                }));
                            }
                        }
                    }
                    "input_json_delta" => {
                        if let Some(partial) =
                            delta.get("partial_json").and_then(|p| p.as_str())
                        {
                            if let Some(slot) = state.blocks.get_mut(&idx) {
                                slot.2.push_str(partial);
                                events.push(Ok(StreamEvent::ToolCallDelta {
                                    id: slot.0.clone(),
                                    delta: partial.to_owned(),
                                }));
                            }
                        }
                    }
                    _ => {}
                }
            }
        }

        "content_block_stop" => {
            let idx = v.get("index").and_then(|i| i.as_u64()).unwrap_or(0);
            if let Some((id, name, args)) = state.blocks.remove(&idx) {
                let arguments: Value =
                    serde_json::from_str(&args).unwrap_or(Value::Object(Default::default()));
                events.push(Ok(StreamEvent::ToolCallFinished {
                    id,
                    name,
                    arguments,
                }));
            }
        }

        "message_delta" => {
            if let Some(out) = v
                .get("usage")
                .and_then(|u| u.get("output_tokens"))
                .and_then(|o| o.as_u64())
            {
                if let Some(ref mut u) = state.usage {
                    u.output_tokens = out as u32;
                }
            }
            if let Some(reason) = v
                .get("delta")
                .and_then(|d| d.get("stop_reason"))
                .and_then(|s| s.as_str())
            {
                state.done_seen = true;
                events.push(Ok(StreamEvent::Done {
                    usage: state.usage.clone(),
                    stop_reason: Some(normalize_stop_reason(reason)),
                }));
            }
        }

        "message_stop" => {
            if !state.done_seen {
                state.done_seen = true;
                events.push(Ok(StreamEvent::Done {
                    usage: state.usage.clone(),
                    stop_reason: Some("stop".into()),
                }));
            }
        }

        "error" => {
            let message = v
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error");
            events.push(Ok(StreamEvent::Error {
                message: message.to_owned(),
            }));
        }

        // ping and unknown event types
        _ => {}
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> &str {
        &self.id
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = self.build_body(req);

        tracing::debug!(provider = %self.id, url = %url, "anthropic stream request");

        let resp = self
            .authed_post(&url)?
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let mut state = SseState::new();
        Ok(crate::sse::event_stream(resp, move |data| {
            parse_payload(data, &mut state)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::StaticCredentials;

    fn provider() -> AnthropicProvider {
        let cfg = ProviderConfig {
            id: "anthropic".into(),
            kind: ProviderKind::Anthropic,
            base_url: String::new(),
            default_model: Some("claude-test".into()),
            auth_env: "X".into(),
        };
        AnthropicProvider::from_config(&cfg, Arc::new(StaticCredentials::new("sk-ant-api-x")))
            .unwrap()
    }

    #[test]
    fn body_hoists_system_messages() {
        let p = provider();
        let req = ChatRequest {
            messages: vec![Message::system("be brief"), Message::user("hi")],
            ..Default::default()
        };
        let body = p.build_body(&req);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn body_serializes_tool_results_as_user_blocks() {
        let p = provider();
        let req = ChatRequest {
            messages: vec![Message::tool_result("t1", "4", false)],
            ..Default::default()
        };
        let body = p.build_body(&req);
        let msg = &body["messages"][0];
        assert_eq!(msg["role"], "user");
        assert_eq!(msg["content"][0]["type"], "tool_result");
        assert_eq!(msg["content"][0]["tool_use_id"], "t1");
    }

    #[test]
    fn text_deltas_become_tokens() {
        let mut state = SseState::new();
        let events = parse_payload(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hi"}}"#,
            &mut state,
        );
        assert_eq!(events.len(), 1);
        assert!(
            matches!(events[0].as_ref().unwrap(), StreamEvent::Token { text } if text == "Hi")
        );
    }

    #[test]
    fn tool_use_block_round_trip() {
        let mut state = SseState::new();
        let open = parse_payload(
            r#"{"type":"content_block_start","index":1,"content_block":{"type":"tool_use","id":"t1","name":"calc"}}"#,
            &mut state,
        );
        assert!(matches!(
            open[0].as_ref().unwrap(),
            StreamEvent::ToolCallStarted { .. }
        ));

        parse_payload(
            r#"{"type":"content_block_delta","index":1,"delta":{"type":"input_json_delta","partial_json":"{\"expr\":\"2+2\"}"}}"#,
            &mut state,
        );
        let stop = parse_payload(r#"{"type":"content_block_stop","index":1}"#, &mut state);
        match stop[0].as_ref().unwrap() {
            StreamEvent::ToolCallFinished {
                id,
                name,
                arguments,
            } => {
                assert_eq!(id, "t1");
                assert_eq!(name, "calc");
                assert_eq!(arguments, &serde_json::json!({"expr": "2+2"}));
            }
            other => panic!("expected ToolCallFinished, got {other:?}"),
        }
    }

    #[test]
    fn malformed_partial_json_finalizes_to_empty_object() {
        let mut state = SseState::new();
        parse_payload(
            r#"{"type":"content_block_start","index":0,"content_block":{"type":"tool_use","id":"t1","name":"calc"}}"#,
            &mut state,
        );
        parse_payload(
            r#"{"type":"content_block_delta","index":0,"delta":{"type":"input_json_delta","partial_json":"{\"expr\": "}}"#,
            &mut state,
        );
        let stop = parse_payload(r#"{"type":"content_block_stop","index":0}"#, &mut state);
        match stop[0].as_ref().unwrap() {
            StreamEvent::ToolCallFinished { arguments, .. } => {
                assert_eq!(arguments, &serde_json::json!({}));
            }
            other => panic!("expected ToolCallFinished, got {other:?}"),
        }
    }

    #[test]
    fn message_delta_carries_usage_and_stop_reason() {
        let mut state = SseState::new();
        parse_payload(
            r#"{"type":"message_start","message":{"usage":{"input_tokens":10,"output_tokens":1}}}"#,
            &mut state,
        );
        let events = parse_payload(
            r#"{"type":"message_delta","delta":{"stop_reason":"tool_use"},"usage":{"output_tokens":25}}"#,
            &mut state,
        );
        match events[0].as_ref().unwrap() {
            StreamEvent::Done { usage, stop_reason } => {
                let u = usage.as_ref().unwrap();
                assert_eq!(u.input_tokens, 10);
                assert_eq!(u.output_tokens, 25);
                assert_eq!(stop_reason.as_deref(), Some("tool_calls"));
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn message_stop_is_suppressed_after_message_delta() {
        let mut state = SseState::new();
        parse_payload(
            r#"{"type":"message_delta","delta":{"stop_reason":"end_turn"}}"#,
            &mut state,
        );
        let events = parse_payload(r#"{"type":"message_stop"}"#, &mut state);
        assert!(events.is_empty());
    }

    #[test]
    fn in_band_error_events_surface() {
        let mut state = SseState::new();
        let events = parse_payload(
            r#"{"type":"error","error":{"message":"overloaded"}}"#,
            &mut state,
        );
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Error { message } if message == "overloaded"
        ));
    }
}
