//! OpenAI-style adapter (chat completions).
//!
//! Streamed tool calls arrive as index-keyed fragments inside
//! `choices[].delta.tool_calls`; the first fragment for an index carries the
//! id and function name, later fragments append to the argument string. The
//! stream terminates with a `[DONE]` sentinel, optionally preceded by a
//! usage-only chunk (`stream_options.include_usage`).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use sb_domain::config::{ProviderConfig, ProviderKind};
use sb_domain::error::{Error, Result};
use sb_domain::message::{ContentPart, Message, MessageContent, Role};
use sb_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::credentials::{identity_headers, CredentialKind, CredentialProvider};
use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{api_error, from_reqwest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct OpenAiProvider {
    id: String,
    base_url: String,
    default_model: String,
    credentials: Arc<dyn CredentialProvider>,
    client: reqwest::Client,
}

impl OpenAiProvider {
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
            default_model: cfg.default_model.clone().unwrap_or_else(|| "gpt-4o".into()),
            credentials,
            client,
        })
    }

    fn authed_post(&self, url: &str) -> Result<reqwest::RequestBuilder> {
        let cred = self.credentials.get(&self.id)?;
        // OpenAI-style APIs always use a bearer header; OAuth identities
        // additionally carry the vendor beta headers.
        let mut builder = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {}", cred.secret))
            .header("Content-Type", "application/json");
        if cred.kind == CredentialKind::OauthBearer {
            for (name, value) in identity_headers(ProviderKind::Openai) {
                builder = builder.header(*name, *value);
            }
        }
        Ok(builder)
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());

        let messages: Vec<Value> = req.messages.iter().map(message_to_wire).collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !req.tools.is_empty() {
            body["tools"] = Value::Array(
                req.tools
                    .iter()
                    .map(|t| {
                        serde_json::json!({
                            "type": "function",
                            "function": {
                                "name": t.name,
                                "description": t.description,
                                "parameters": t.parameters,
                            }
                        })
                    })
                    .collect(),
            );
        }
        if let Some(max) = req.max_tokens {
            body["max_tokens"] = serde_json::json!(max);
        }
        if let Some(temp) = req.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        body
    }
}

fn message_to_wire(msg: &Message) -> Value {
    match msg.role {
        Role::System => serde_json::json!({
            "role": "system",
            "content": msg.content.all_text(),
        }),
        Role::User => serde_json::json!({
            "role": "user",
            "content": msg.content.all_text(),
        }),
        Role::Assistant => {
            let mut wire = serde_json::json!({
                "role": "assistant",
                "content": msg.content.all_text(),
            });
            if let MessageContent::Parts(parts) = &msg.content {
                let tool_calls: Vec<Value> = parts
                    .iter()
                    .filter_map(|p| match p {
                        ContentPart::ToolUse { id, name, input } => Some(serde_json::json!({
                            "id": id,
                            "type": "function",
                            "function": {
                                "name": name,
                                "arguments": input.to_string(),
                            }
                        })),
                        _ => None,
                    })
                    .collect();
                if !tool_calls.is_empty() {
                    wire["tool_calls"] = Value::Array(tool_calls);
                }
            }
            wire
        }
        Role::Tool => {
            // One wire message per tool_result part; the loop emits one
            // tool message per result, so taking the first is exact.
            let (id, content) = match &msg.content {
                MessageContent::Parts(parts) => parts
                    .iter()
                    .find_map(|p| match p {
                        ContentPart::ToolResult {
                            tool_use_id,
                            content,
                            ..
                        } => Some((tool_use_id.clone(), content.clone())),
                        _ => None,
                    })
                    .unwrap_or_default(),
                MessageContent::Text(t) => (String::new(), t.clone()),
            };
            serde_json::json!({
                "role": "tool",
                "tool_call_id": id,
                "content": content,
            })
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Index → call id mapping so argument fragments are keyed by the real id.
#[derive(Default)]
struct SseState {
    ids_by_index: HashMap<u64, String>,
}

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        input_tokens: v.get("prompt_tokens")?.as_u64()? as u32,
        output_tokens: v
            .get("completion_tokens")
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as u32,
    })
}

fn parse_payload(data: &str, state: &mut SseState) -> Vec<Result<StreamEvent>> {
    if data.trim() == "[DONE]" {
        return Vec::new();
    }

    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut events = Vec::new();

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    // Usage-only chunk after the last choice.
    let Some(choice) = choice else {
        if let Some(usage) = v.get("usage").and_then(parse_usage) {
            events.push(Ok(StreamEvent::Done {
                usage: Some(usage),
                stop_reason: None,
            }));
        }
        return events;
    };

    let delta = choice.get("delta").unwrap_or(&Value::Null);

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            events.push(Ok(StreamEvent::Token {
                text: text.to_owned(),
            }));
        }
    }

    if let Some(calls) = delta.get("tool_calls").and_then(|t| t.as_array()) {
        for call in calls {
            let index = call.get("index").and_then(|i| i.as_u64()).unwrap_or(0);

            if let Some(id) = call.get("id").and_then(|i| i.as_str()) {
                let name = call
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(|n| n.as_str())
                    .unwrap_or("");
                state.ids_by_index.insert(index, id.to_owned());
                events.push(Ok(StreamEvent::ToolCallStarted {
                    id: id.to_owned(),
                    name: name.to_owned(),
                }));
            }

            if let Some(args) = call
                .get("function")
                .and_then(|f| f.get("arguments"))
                .and_then(|a| a.as_str())
            {
                if !args.is_empty() {
                    if let Some(id) = state.ids_by_index.get(&index) {
                        events.push(Ok(StreamEvent::ToolCallDelta {
                            id: id.clone(),
                            delta: args.to_owned(),
                        }));
                    }
                }
            }
        }
    }

    if let Some(reason) = choice.get("finish_reason").and_then(|f| f.as_str()) {
        let usage = v.get("usage").and_then(parse_usage);
        events.push(Ok(StreamEvent::Done {
            usage,
            stop_reason: Some(reason.to_owned()),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for OpenAiProvider {
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
        let url = format!("{}/chat/completions", self.base_url);
        let body = self.build_body(req);

        tracing::debug!(provider = %self.id, url = %url, "openai stream request");

        let resp = self
            .authed_post(&url)?
            .json(&body)
            .send()
            .await
            .map_err(from_reqwest)?;

        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        let mut state = SseState::default();
        Ok(crate::sse::event_stream(resp, move |data| {
            parse_payload(data, &mut state)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_sentinel_yields_nothing() {
        let mut state = SseState::default();
        assert!(parse_payload("[DONE]", &mut state).is_empty());
    }

    #[test]
    fn content_delta_becomes_token() {
        let mut state = SseState::default();
        let events = parse_payload(
            r#"{"choices":[{"delta":{"content":"Hello"}}]}"#,
            &mut state,
        );
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Token { text } if text == "Hello"
        ));
    }

    #[test]
    fn tool_call_fragments_keyed_by_real_id() {
        let mut state = SseState::default();
        let open = parse_payload(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_1","function":{"name":"calc","arguments":""}}]}}]}"#,
            &mut state,
        );
        assert!(matches!(
            open[0].as_ref().unwrap(),
            StreamEvent::ToolCallStarted { id, name } if id == "call_1" && name == "calc"
        ));

        let frag = parse_payload(
            r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"function":{"arguments":"{\"expr\":\"2+2\"}"}}]}}]}"#,
            &mut state,
        );
        assert!(matches!(
            frag[0].as_ref().unwrap(),
            StreamEvent::ToolCallDelta { id, delta }
                if id == "call_1" && delta.contains("expr")
        ));
    }

    #[test]
    fn finish_reason_emits_done() {
        let mut state = SseState::default();
        let events = parse_payload(
            r#"{"choices":[{"delta":{},"finish_reason":"tool_calls"}]}"#,
            &mut state,
        );
        assert!(matches!(
            events[0].as_ref().unwrap(),
            StreamEvent::Done { stop_reason, .. } if stop_reason.as_deref() == Some("tool_calls")
        ));
    }

    #[test]
    fn usage_only_chunk_emits_done_with_usage() {
        let mut state = SseState::default();
        let events = parse_payload(
            r#"{"choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#,
            &mut state,
        );
        match events[0].as_ref().unwrap() {
            StreamEvent::Done { usage, .. } => {
                let u = usage.as_ref().unwrap();
                assert_eq!(u.input_tokens, 7);
                assert_eq!(u.output_tokens, 3);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[test]
    fn assistant_message_with_calls_serializes_function_shape() {
        let msg = Message::assistant_with_calls(
            "",
            &[sb_domain::message::ToolCall {
                id: "call_9".into(),
                name: "shell".into(),
                arguments: serde_json::json!({"command": "ls"}),
            }],
        );
        let wire = message_to_wire(&msg);
        assert_eq!(wire["tool_calls"][0]["id"], "call_9");
        assert_eq!(wire["tool_calls"][0]["function"]["name"], "shell");
        // Arguments travel as a JSON string, not a structured object.
        assert!(wire["tool_calls"][0]["function"]["arguments"].is_string());
    }

    #[test]
    fn tool_message_carries_tool_call_id() {
        let msg = Message::tool_result("call_9", "output", false);
        let wire = message_to_wire(&msg);
        assert_eq!(wire["role"], "tool");
        assert_eq!(wire["tool_call_id"], "call_9");
        assert_eq!(wire["content"], "output");
    }
}
