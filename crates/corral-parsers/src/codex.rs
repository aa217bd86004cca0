// SPDX-License-Identifier: MIT

//! Codex JSONL dialect (spec §4.1).

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
        "thread.started" => {
            let session_id = get_str(&json, "thread_id").map(str::to_string);
            vec![Event::Init {
                agent: agent.to_string(),
                timestamp,
                model: None,
                session_id,
            }]
        }
        "turn.started" => vec![Event::TurnStart {
            agent: agent.to_string(),
            timestamp,
        }],
        "turn.completed" => vec![Event::Result {
            agent: agent.to_string(),
            timestamp,
            status: ResultStatus::Success,
            duration_ms: None,
            usage: json.get("usage").cloned(),
        }],
        "item.completed" => parse_item_completed(agent, timestamp, &json)
            .into_iter()
            .collect(),
        _ => vec![raw_event(agent, raw_line)],
    }
}

fn parse_item_completed(
    agent: &str,
    timestamp: chrono::DateTime<chrono::Utc>,
    json: &Value,
) -> Option<Event> {
    let item = json.get("item")?;
    let item_type = get_str(item, "type")?;

    match item_type {
        "agent_message" => Some(Event::Message {
            agent: agent.to_string(),
            timestamp,
            content: get_str(item, "text").unwrap_or_default().to_string(),
            complete: true,
        }),
        "tool_call" => {
            let name = get_str(item, "name").unwrap_or_default();
            let args = item.get("arguments").cloned().unwrap_or(Value::Null);
            match name {
                "write_file" => {
                    let path = get_str(&args, "path")?.to_string();
                    Some(Event::FileWrite {
                        agent: agent.to_string(),
                        timestamp,
                        path,
                    })
                }
                "read_file" => {
                    let path = get_str(&args, "path")?.to_string();
                    Some(Event::FileRead {
                        agent: agent.to_string(),
                        timestamp,
                        path,
                    })
                }
                "shell" => {
                    let command = get_str(&args, "command").unwrap_or_default().to_string();
                    Some(Event::Bash {
                        agent: agent.to_string(),
                        timestamp,
                        tool: name.to_string(),
                        command,
                        exit_code: None,
                    })
                }
                other => Some(Event::ToolUse {
                    agent: agent.to_string(),
                    timestamp,
                    tool: other.to_string(),
                    args,
                }),
            }
        }
        _ => None,
    }
}
