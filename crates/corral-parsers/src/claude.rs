// SPDX-License-Identifier: MIT

//! Cursor/Claude JSONL dialect (spec §4.1). Claude reuses this dialect verbatim.

use crate::{get_str, raw_event, timestamp_or_now, try_parse_json};
use corral_core::{Event, ResultStatus};
use serde_json::Value;

pub fn parse_line(agent: &str, raw_line: &str) -> Vec<Event> {
    let Some(json) = try_parse_json(raw_line) else {
        return vec![raw_event(agent, raw_line)];
    };
    let Some(record_type) = get_str(&json, "type") else {
        return vec![raw_event(agent, raw_line)];
    };
    let timestamp = timestamp_or_now(&json);

    match record_type {
        "system" if get_str(&json, "subtype") == Some("init") => vec![Event::Init {
            agent: agent.to_string(),
            timestamp,
            model: get_str(&json, "model").map(str::to_string),
            session_id: get_str(&json, "session_id").map(str::to_string),
        }],
        "thinking" => parse_thinking(agent, timestamp, &json).into_iter().collect(),
        "assistant" => parse_assistant_text(agent, timestamp, &json),
        "tool_call" => parse_tool_call(agent, timestamp, &json).into_iter().collect(),
        "result" => vec![Event::Result {
            agent: agent.to_string(),
            timestamp,
            status: if get_str(&json, "subtype") == Some("error") {
                ResultStatus::Error
            } else {
                ResultStatus::Success
            },
            duration_ms: json.get("duration_ms").and_then(Value::as_u64),
            usage: json.get("usage").cloned(),
        }],
        _ => vec![raw_event(agent, raw_line)],
    }
}

fn parse_thinking(agent: &str, timestamp: chrono::DateTime<chrono::Utc>, json: &Value) -> Option<Event> {
    let subtype = get_str(json, "subtype")?;
    if subtype != "delta" && subtype != "complete" {
        return None;
    }
    Some(Event::Thinking {
        agent: agent.to_string(),
        timestamp,
        content: get_str(json, "text").unwrap_or_default().to_string(),
        complete: subtype == "complete",
    })
}

fn parse_assistant_text(agent: &str, timestamp: chrono::DateTime<chrono::Utc>, json: &Value) -> Vec<Event> {
    let Some(parts) = json
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };
    parts
        .iter()
        .filter(|part| get_str(part, "type") == Some("text"))
        .filter_map(|part| {
            let text = get_str(part, "text")?;
            Some(Event::Message {
                agent: agent.to_string(),
                timestamp,
                content: text.to_string(),
                complete: true,
            })
        })
        .collect()
}

fn parse_tool_call(agent: &str, timestamp: chrono::DateTime<chrono::Utc>, json: &Value) -> Option<Event> {
    let subtype = get_str(json, "subtype")?;
    match subtype {
        "edit" => Some(Event::FileWrite {
            agent: agent.to_string(),
            timestamp,
            path: get_str(json, "path")?.to_string(),
        }),
        "read" => Some(Event::FileRead {
            agent: agent.to_string(),
            timestamp,
            path: get_str(json, "path")?.to_string(),
        }),
        "shell" => Some(Event::Bash {
            agent: agent.to_string(),
            timestamp,
            tool: subtype.to_string(),
            command: get_str(json, "command").unwrap_or_default().to_string(),
            exit_code: None,
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_init_carries_model_and_session_id() {
        let line = r#"{"type":"system","subtype":"init","model":"opus","session_id":"s1"}"#;
        let events = parse_line("a1", line);
        match &events[0] {
            Event::Init { model, session_id, .. } => {
                assert_eq!(model.as_deref(), Some("opus"));
                assert_eq!(session_id.as_deref(), Some("s1"));
            }
            other => panic!("expected init, got {other:?}"),
        }
    }

    #[test]
    fn thinking_delta_is_incomplete() {
        let line = r#"{"type":"thinking","subtype":"delta","text":"reasoning..."}"#;
        match &parse_line("a1", line)[0] {
            Event::Thinking { complete, .. } => assert!(!complete),
            other => panic!("expected thinking, got {other:?}"),
        }
    }

    #[test]
    fn thinking_complete_is_complete() {
        let line = r#"{"type":"thinking","subtype":"complete","text":"done"}"#;
        match &parse_line("a1", line)[0] {
            Event::Thinking { complete, .. } => assert!(complete),
            other => panic!("expected thinking, got {other:?}"),
        }
    }

    #[test]
    fn assistant_text_parts_become_one_message_each() {
        let line = r#"{"type":"assistant","message":{"content":[{"type":"text","text":"a"},{"type":"text","text":"b"}]}}"#;
        let events = parse_line("a1", line);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| matches!(e, Event::Message { .. })));
    }

    #[test]
    fn tool_call_edit_becomes_file_write() {
        let line = r#"{"type":"tool_call","subtype":"edit","path":"a.rs"}"#;
        match &parse_line("a1", line)[0] {
            Event::FileWrite { path, .. } => assert_eq!(path, "a.rs"),
            other => panic!("expected file_write, got {other:?}"),
        }
    }

    #[test]
    fn result_reports_success_and_duration() {
        let line = r#"{"type":"result","subtype":"success","duration_ms":5000}"#;
        match &parse_line("a1", line)[0] {
            Event::Result { status, duration_ms, .. } => {
                assert_eq!(*status, ResultStatus::Success);
                assert_eq!(*duration_ms, Some(5000));
            }
            other => panic!("expected result, got {other:?}"),
        }
    }

    #[test]
    fn missing_path_on_edit_drops_event() {
        let line = r#"{"type":"tool_call","subtype":"edit"}"#;
        assert!(parse_line("a1", line).is_empty());
    }
}
