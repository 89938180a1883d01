//! Google-style adapter (`streamGenerateContent`).
//!
//! Function calls arrive complete inside a single candidate part (no
//! fragment assembly); the wire carries no call ids, so the adapter mints
//! one per call and the conversation keeps referencing it consistently.

use std::sync::Arc;

use serde_json::Value;

use sb_domain::config::ProviderConfig;
use sb_domain::error::{Error, Result};
use sb_domain::message::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use sb_domain::stream::{BoxStream, StreamEvent, Usage};

use crate::credentials::{CredentialKind, CredentialProvider};
use crate::traits::{ChatRequest, LlmProvider};
use crate::util::{api_error, from_reqwest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Adapter
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct GoogleProvider {
    id: String,
    base_url: String,
    default_model: String,
    credentials: Arc<dyn CredentialProvider>,
    client: reqwest::Client,
}

impl GoogleProvider {
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
                .unwrap_or_else(|| "gemini-2.0-flash".into()),
            credentials,
            client,
        })
    }

    fn build_body(&self, req: &ChatRequest) -> Value {
        let mut system_parts: Vec<String> = Vec::new();
        let mut contents: Vec<Value> = Vec::new();

        for msg in &req.messages {
            match msg.role {
                Role::System => system_parts.push(msg.content.all_text()),
                Role::User => contents.push(serde_json::json!({
                    "role": "user",
                    "parts": [{"text": msg.content.all_text()}],
                })),
                Role::Assistant => contents.push(assistant_to_wire(msg)),
                Role::Tool => contents.push(tool_result_to_wire(msg)),
            }
        }

        let mut body = serde_json::json!({ "contents": contents });

        if !system_parts.is_empty() {
            body["systemInstruction"] = serde_json::json!({
                "parts": [{"text": system_parts.join("\n\n")}],
            });
        }
        if !req.tools.is_empty() {
            let declarations: Vec<Value> = req
                .tools
                .iter()
                .map(|t: &ToolDefinition| {
                    serde_json::json!({
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    })
                })
                .collect();
            body["tools"] = serde_json::json!([{"functionDeclarations": declarations}]);
        }

        let mut generation: serde_json::Map<String, Value> = Default::default();
        if let Some(max) = req.max_tokens {
            generation.insert("maxOutputTokens".into(), serde_json::json!(max));
        }
        if let Some(temp) = req.temperature {
            generation.insert("temperature".into(), serde_json::json!(temp));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }

        body
    }
}

fn assistant_to_wire(msg: &Message) -> Value {
    let mut parts: Vec<Value> = Vec::new();
    match &msg.content {
        MessageContent::Text(t) => {
            if !t.is_empty() {
                parts.push(serde_json::json!({"text": t}));
            }
        }
        MessageContent::Parts(content_parts) => {
            for p in content_parts {
                match p {
                    ContentPart::Text { text } => {
                        parts.push(serde_json::json!({"text": text}))
                    }
                    ContentPart::ToolUse { name, input, .. } => {
                        parts.push(serde_json::json!({
                            "functionCall": {"name": name, "args": input}
                        }));
                    }
                    ContentPart::ToolResult { .. } => {}
                }
            }
        }
    }
    serde_json::json!({"role": "model", "parts": parts})
}

fn tool_result_to_wire(msg: &Message) -> Value {
    // Gemini correlates function responses positionally, not by id; the
    // minted call id doubles as the response name.
    let (name, output) = first_tool_result(&msg.content);
    serde_json::json!({
        "role": "user",
        "parts": [{
            "functionResponse": {
                "name": name,
                "response": {"output": output},
            }
        }],
    })
}

fn first_tool_result(content: &MessageContent) -> (String, String) {
    match content {
        MessageContent::Text(t) => ("tool".to_owned(), t.clone()),
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
            .unwrap_or_else(|| ("tool".to_owned(), String::new())),
    }
}

fn normalize_stop_reason(raw: &str) -> String {
    match raw {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        other => other.to_lowercase(),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SSE parsing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn parse_usage(v: &Value) -> Option<Usage> {
    Some(Usage {
        input_tokens: v.get("promptTokenCount")?.as_u64()? as u32,
        output_tokens: v
            .get("candidatesTokenCount")
            .and_then(|c| c.as_u64())
            .unwrap_or(0) as u32,
    })
}

fn parse_payload(data: &str) -> Vec<Result<StreamEvent>> {
    let v: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![Err(Error::Json(e))],
    };

    let mut events = Vec::new();

    let Some(candidate) = v
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first())
    else {
        return events;
    };

    if let Some(parts) = candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array())
    {
        for part in parts {
            if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
                if !text.is_empty() {
                    events.push(Ok(StreamEvent::Token {
                        text: text.to_owned(),
                    }));
                }
            }
            if let Some(fc) = part.get("functionCall") {
                let name = fc
                    .get("name")
                    .and_then(|n| n.as_str())
                    .unwrap_or("")
                    .to_owned();
                let arguments = fc
                    .get("args")
                    .cloned()
                    .unwrap_or(Value::Object(Default::default()));
                // The wire has no call id; mint one.
                let id = format!("call_{}", uuid::Uuid::new_v4());
                events.push(Ok(StreamEvent::ToolCallStarted {
                    id: id.clone(),
                    name: name.clone(),
                }));
                events.push(Ok(StreamEvent::ToolCallFinished {
                    id,
                    name,
                    arguments,
                }));
            }
        }
    }

    if let Some(reason) = candidate.get("finishReason").and_then(|f| f.as_str()) {
        let usage = v.get("usageMetadata").and_then(parse_usage);
        events.push(Ok(StreamEvent::Done {
            usage,
            stop_reason: Some(normalize_stop_reason(reason)),
        }));
    }

    events
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl LlmProvider for GoogleProvider {
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
        let model = req
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone());
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.base_url, model
        );
        let body = self.build_body(req);

        tracing::debug!(provider = %self.id, model = %model, "google stream request");

        let cred = self.credentials.get(&self.id)?;
        let mut builder = self.client.post(&url).header("Content-Type", "application/json");
        builder = match cred.kind {
            CredentialKind::ApiKey => builder.header("x-goog-api-key", &cred.secret),
            CredentialKind::OauthBearer => {
                builder.header("Authorization", format!("Bearer {}", cred.secret))
            }
        };

        let resp = builder.json(&body).send().await.map_err(from_reqwest)?;
        if !resp.status().is_success() {
            return Err(api_error(resp).await);
        }

        Ok(crate::sse::event_stream(resp, move |data| {
            parse_payload(data)
        }))
    }
}
