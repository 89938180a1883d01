use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events emitted during LLM streaming (provider-agnostic).
///
/// All three wire dialects (anthropic-style, openai-style, google-style) are
/// reduced to this event vocabulary by their adapters.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// An incremental text fragment.
    Token { text: String },

    /// A tool-call slot opened with its id and name.
    ToolCallStarted { id: String, name: String },

    /// A partial JSON fragment for a tool call's arguments.
    ToolCallDelta { id: String, delta: String },

    /// A tool call completed with fully-parsed arguments.
    ToolCallFinished {
        id: String,
        name: String,
        arguments: serde_json::Value,
    },

    /// The stream finished.
    Done {
        usage: Option<Usage>,
        stop_reason: Option<String>,
    },

    /// The provider reported an in-band error event.
    Error { message: String },
}

/// Token usage for one inference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

impl Usage {
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate another inference's usage into this one.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage {
            input_tokens: 10,
            output_tokens: 5,
        });
        total.add(&Usage {
            input_tokens: 3,
            output_tokens: 2,
        });
        assert_eq!(total.input_tokens, 13);
        assert_eq!(total.output_tokens, 7);
        assert_eq!(total.total(), 20);
    }
}
