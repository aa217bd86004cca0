// SPDX-License-Identifier: MIT

//! Gemini JSONL dialect (spec §4.1). Session id is uncertain in the source
//! material; an absent `session_id` stays `None` rather than being synthesized
//! (spec §9 open question).

use crate::{get_str, raw_event, timestamp_or_now, try_parse_json};
use corral_core::Event;
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
        "init" => vec![Event::Init {
            agent: agent.to_string(),
            timestamp,
            model: get_str(&json, "model").map(str::to_string),
            session_id: get_str(&json, "session_id").map(str::to_string),
        }],
        "message" => {
            let delta = json.get("delta").and_then(Value::as_bool).unwrap_or(false);
            vec![Event::Message {
                agent: agent.to_string(),
                timestamp,
                content: get_str(&json, "text").unwrap_or_default().to_string(),
                complete: !delta,
            }]
        }
        "tool_call" => parse_tool_call(agent, timestamp, &json).into_iter().collect(),
        _ => vec![raw_event(agent, raw_line)],
    }
}

fn parse_tool_call(agent: &str, timestamp: chrono::DateTime<chrono::Utc>, json: &Value) -> Option<Event> {
    let name = get_str(json, "name")?;
    match name {
        "write_file" => Some(Event::FileWrite {
            agent: agent.to_string(),
            timestamp,
            path: get_str(json, "path")?.to_string(),
        }),
        "read_file" => Some(Event::FileRead {
            agent: agent.to_string(),
            timestamp,
            path: get_str(json, "path")?.to_string(),
        }),
        "run_command" => Some(Event::Bash {
            agent: agent.to_string(),
            timestamp,
            tool: name.to_string(),
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
    fn init_without_session_id_stays_none() {
        let line = r#"{"type":"init","model":"gemini-pro"}"#;
        match &parse_line("a1", line)[0] {
            Event::Init { session_id, model, .. } => {
                assert_eq!(*session_id, None);
                assert_eq!(model.as_deref(), Some("gemini-pro"));
            }
            other => panic!("expected init, got {other:?}"),
        }
    }

    #[test]
    fn delta_message_is_incomplete() {
        let line = r#"{"type":"message","delta":true,"text":"partial"}"#;
        match &parse_line("a1", line)[0] {
            Event::Message { complete, .. } => assert!(!complete),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn non_delta_message_is_complete() {
        let line = r#"{"type":"message","text":"final"}"#;
        match &parse_line("a1", line)[0] {
            Event::Message { complete, .. } => assert!(complete),
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn run_command_becomes_bash() {
        let line = r#"{"type":"tool_call","name":"run_command","command":"ls -la"}"#;
        match &parse_line("a1", line)[0] {
            Event::Bash { command, .. } => assert_eq!(command, "ls -la"),
            other => panic!("expected bash, got {other:?}"),
        }
    }

    #[test]
    fn unrecognized_tool_call_drops_silently() {
        let line = r#"{"type":"tool_call","name":"something_else"}"#;
        assert!(parse_line("a1", line).is_empty());
    }
}
