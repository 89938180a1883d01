//! The per-session runtime: agent loop state machine, parallel tool
//! dispatch, session workers, and their registry.

pub mod agent_loop;
pub mod dispatch;
pub mod registry;
pub mod session_tools;
pub mod worker;

pub use agent_loop::{RunOptions, NO_RESPONSE_SENTINEL, TOO_MANY_TOOL_CALLS_SENTINEL};
pub use registry::SessionRegistry;

use sb_domain::message::Message;
use sb_sessions::MessageRecord;

/// Convert persisted records into the in-memory working set for a run.
///
/// Tool records without a correlation id are skipped — a tool result the
/// model cannot tie to a call would only confuse it.
pub(crate) fn records_to_messages(records: &[MessageRecord]) -> Vec<Message> {
    let mut messages = Vec::new();
    for record in records {
        match record.role.as_str() {
            "user" => messages.push(Message::user(&record.content)),
            "system" => messages.push(Message::system(&record.content)),
            "assistant" => match &record.tool_calls {
                Some(calls) if !calls.is_empty() => {
                    messages.push(Message::assistant_with_calls(&record.content, calls));
                }
                _ => messages.push(Message::assistant(&record.content)),
            },
            "tool" => {
                if let Some(ref id) = record.tool_call_id {
                    messages.push(Message::tool_result(id, &record.content, false));
                }
            }
            _ => {}
        }
    }
    messages
}

/// UTF-8-safe preview truncation for logs and status details.
pub(crate) fn truncate_str(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use sb_domain::message::{MessageContent, Role, ToolCall};

    #[test]
    fn records_round_trip_roles() {
        let records = vec![
            MessageRecord::user("hi"),
            MessageRecord::assistant("hello"),
            MessageRecord::new("system", "note"),
        ];
        let messages = records_to_messages(&records);
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[2].role, Role::System);
    }

    #[test]
    fn assistant_with_calls_becomes_parts() {
        let calls = vec![ToolCall {
            id: "t1".into(),
            name: "calc".into(),
            arguments: serde_json::json!({}),
        }];
        let records = vec![
            MessageRecord::assistant_with_calls("pre", calls),
            MessageRecord::tool("t1", "4"),
        ];
        let messages = records_to_messages(&records);
        assert_eq!(messages.len(), 2);
        assert!(matches!(messages[0].content, MessageContent::Parts(_)));
        assert_eq!(messages[1].role, Role::Tool);
    }

    #[test]
    fn orphan_tool_records_are_dropped() {
        let records = vec![MessageRecord::new("tool", "orphan")];
        assert!(records_to_messages(&records).is_empty());
    }

    #[test]
    fn unknown_roles_are_dropped() {
        let records = vec![MessageRecord::new("narrator", "meanwhile")];
        assert!(records_to_messages(&records).is_empty());
    }

    #[test]
    fn truncate_str_respects_char_boundaries() {
        assert_eq!(truncate_str("hello", 10), "hello");
        assert_eq!(truncate_str("hello world", 5), "hello...");
        // 2-byte char at the cut point.
        assert_eq!(truncate_str("h\u{00e9}llo", 2), "h...");
    }
}
