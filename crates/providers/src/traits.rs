use sb_domain::error::Result;
use sb_domain::message::{Message, ToolCall, ToolDefinition};
use sb_domain::stream::{BoxStream, StreamEvent, Usage};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / aggregate types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A provider-agnostic chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages. System turns are hoisted by adapters that
    /// need them in a separate top-level field.
    pub messages: Vec<Message>,
    /// Tool descriptors the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Model identifier override. `None` uses the provider's default.
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

/// Terminal aggregate of one streamed inference.
#[derive(Debug, Clone, Default)]
pub struct ChatAggregate {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    pub stop_reason: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Provider trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trait every LLM adapter implements.
///
/// The only operation is streaming: callers that need a full response feed
/// the event stream through a [`StreamCollector`]. A non-2xx HTTP status is
/// reported as `Err(ApiError)` before any event is yielded; a mid-stream
/// transport error surfaces as an `Err` item and the caller discards the
/// partial aggregate. The adapter never retries.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Unique identifier for this provider instance.
    fn id(&self) -> &str;

    /// Model used when the request does not name one.
    fn default_model(&self) -> &str;

    /// Send a chat request and return the event stream.
    async fn chat_stream(
        &self,
        req: &ChatRequest,
    ) -> Result<BoxStream<'static, Result<StreamEvent>>>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// StreamCollector — events → terminal aggregate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Incrementally reduces [`StreamEvent`]s to a [`ChatAggregate`].
///
/// Tool calls may arrive fully-formed (`ToolCallFinished`) or as
/// started/delta fragments that are only finalized here. A fragment buffer
/// whose accumulated JSON fails to parse finalizes to an empty object — the
/// run continues and the tool validates its own inputs.
#[derive(Default)]
pub struct StreamCollector {
    content: String,
    /// Open fragment slots in arrival order: (id, name, args buffer).
    open: Vec<(String, String, String)>,
    finished: Vec<ToolCall>,
    usage: Option<Usage>,
    stop_reason: Option<String>,
}

impl StreamCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Token { text } => self.content.push_str(text),
            StreamEvent::ToolCallStarted { id, name } => {
                self.open.push((id.clone(), name.clone(), String::new()));
            }
            StreamEvent::ToolCallDelta { id, delta } => {
                if let Some(slot) = self.open.iter_mut().find(|(sid, _, _)| sid == id) {
                    slot.2.push_str(delta);
                }
            }
            StreamEvent::ToolCallFinished {
                id,
                name,
                arguments,
            } => {
                self.open.retain(|(sid, _, _)| sid != id);
                self.finished.push(ToolCall {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                });
            }
            StreamEvent::Done { usage, stop_reason } => {
                if usage.is_some() {
                    self.usage = usage.clone();
                }
                if stop_reason.is_some() {
                    self.stop_reason = stop_reason.clone();
                }
            }
            StreamEvent::Error { .. } => {}
        }
    }

    /// Finalize: parse any remaining fragment slots and produce the aggregate.
    pub fn finish(mut self) -> ChatAggregate {
        for (id, name, args) in self.open.drain(..) {
            let arguments: Value = if args.trim().is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(&args).unwrap_or_else(|e| {
                    tracing::warn!(
                        call_id = %id,
                        tool = %name,
                        error = %e,
                        "tool-call arguments are not valid JSON; defaulting to empty object"
                    );
                    Value::Object(Default::default())
                })
            };
            self.finished.push(ToolCall {
                id,
                name,
                arguments,
            });
        }

        ChatAggregate {
            content: self.content,
            tool_calls: self.finished,
            usage: self.usage.unwrap_or_default(),
            stop_reason: self.stop_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_tokens_in_order() {
        let mut c = StreamCollector::new();
        for text in ["He", "llo", "!"] {
            c.absorb(&StreamEvent::Token { text: text.into() });
        }
        let agg = c.finish();
        assert_eq!(agg.content, "Hello!");
        assert!(agg.tool_calls.is_empty());
    }

    #[test]
    fn finished_tool_call_passes_through() {
        let mut c = StreamCollector::new();
        c.absorb(&StreamEvent::ToolCallFinished {
            id: "t1".into(),
            name: "calc".into(),
            arguments: serde_json::json!({"expr": "2+2"}),
        });
        let agg = c.finish();
        assert_eq!(agg.tool_calls.len(), 1);
        assert_eq!(agg.tool_calls[0].name, "calc");
    }

    #[test]
    fn fragments_concatenate_to_the_same_arguments() {
        let mut c = StreamCollector::new();
        c.absorb(&StreamEvent::ToolCallStarted {
            id: "t1".into(),
            name: "calc".into(),
        });
        c.absorb(&StreamEvent::ToolCallDelta {
            id: "t1".into(),
            delta: "{\"expr\":".into(),
        });
        c.absorb(&StreamEvent::ToolCallDelta {
            id: "t1".into(),
            delta: " \"2+2\"}".into(),
        });
        let agg = c.finish();
        assert_eq!(agg.tool_calls.len(), 1);
        assert_eq!(
            agg.tool_calls[0].arguments,
            serde_json::json!({"expr": "2+2"})
        );
    }

    #[test]
    fn malformed_fragment_buffer_finalizes_to_empty_object() {
        let mut c = StreamCollector::new();
        c.absorb(&StreamEvent::ToolCallStarted {
            id: "t1".into(),
            name: "calc".into(),
        });
        c.absorb(&StreamEvent::ToolCallDelta {
            id: "t1".into(),
            delta: "{\"expr\": ".into(),
        });
        let agg = c.finish();
        assert_eq!(agg.tool_calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn empty_fragment_buffer_finalizes_to_empty_object() {
        let mut c = StreamCollector::new();
        c.absorb(&StreamEvent::ToolCallStarted {
            id: "t1".into(),
            name: "noop".into(),
        });
        let agg = c.finish();
        assert_eq!(agg.tool_calls[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn usage_and_stop_reason_from_done() {
        let mut c = StreamCollector::new();
        c.absorb(&StreamEvent::Done {
            usage: Some(Usage {
                input_tokens: 12,
                output_tokens: 34,
            }),
            stop_reason: Some("stop".into()),
        });
        let agg = c.finish();
        assert_eq!(agg.usage.input_tokens, 12);
        assert_eq!(agg.usage.output_tokens, 34);
        assert_eq!(agg.stop_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn later_done_does_not_erase_usage() {
        // Some dialects send usage early and the stop reason later.
        let mut c = StreamCollector::new();
        c.absorb(&StreamEvent::Done {
            usage: Some(Usage {
                input_tokens: 5,
                output_tokens: 0,
            }),
            stop_reason: None,
        });
        c.absorb(&StreamEvent::Done {
            usage: None,
            stop_reason: Some("tool_calls".into()),
        });
        let agg = c.finish();
        assert_eq!(agg.usage.input_tokens, 5);
        assert_eq!(agg.stop_reason.as_deref(), Some("tool_calls"));
    }
}
