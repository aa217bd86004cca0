// SPDX-License-Identifier: MIT

//! The uniform event shape every vendor parser normalizes into (spec §3, §4.1).
//!
//! Serializes as `{"type": "...", "agent": ..., "timestamp": ..., ...}`.
//! Unknown `type` tags are rejected rather than silently dropped — the
//! parser (corral-parsers), not serde, is responsible for turning unknown
//! vendor lines into `Raw` events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status reported by a vendor's terminal `result` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

/// How urgently a consumer should surface this event (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Critical,
    Important,
    Verbose,
}

/// A single normalized event emitted by a vendor parser for one raw output line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Init {
        agent: String,
        timestamp: DateTime<Utc>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },
    TurnStart {
        agent: String,
        timestamp: DateTime<Utc>,
    },
    Thinking {
        agent: String,
        timestamp: DateTime<Utc>,
        content: String,
        complete: bool,
    },
    ThinkingDelta {
        agent: String,
        timestamp: DateTime<Utc>,
        content: String,
    },
    Message {
        agent: String,
        timestamp: DateTime<Utc>,
        content: String,
        complete: bool,
    },
    MessageDelta {
        agent: String,
        timestamp: DateTime<Utc>,
        content: String,
    },
    ToolUse {
        agent: String,
        timestamp: DateTime<Utc>,
        tool: String,
        #[serde(default)]
        args: Value,
    },
    Bash {
        agent: String,
        timestamp: DateTime<Utc>,
        /// The vendor-specific tool name this was normalized from (e.g.
        /// Codex's `shell`, Gemini's `run_command`), spec §8 seed test 2.
        tool: String,
        command: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },
    FileRead {
        agent: String,
        timestamp: DateTime<Utc>,
        path: String,
    },
    FileWrite {
        agent: String,
        timestamp: DateTime<Utc>,
        path: String,
    },
    FileCreate {
        agent: String,
        timestamp: DateTime<Utc>,
        path: String,
    },
    FileDelete {
        agent: String,
        timestamp: DateTime<Utc>,
        path: String,
    },
    DirectoryList {
        agent: String,
        timestamp: DateTime<Utc>,
        path: String,
    },
    Result {
        agent: String,
        timestamp: DateTime<Utc>,
        status: ResultStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        duration_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Value>,
    },
    Error {
        agent: String,
        timestamp: DateTime<Utc>,
        message: String,
    },
    Warning {
        agent: String,
        timestamp: DateTime<Utc>,
        message: String,
    },
    Raw {
        agent: String,
        timestamp: DateTime<Utc>,
        content: String,
    },
    UserMessage {
        agent: String,
        timestamp: DateTime<Utc>,
        content: String,
    },
}

impl Event {
    /// The closed-set type tag, matching the `type` field on the wire.
    pub fn event_type(&self) -> &'static str {
        match self {
            Event::Init { .. } => "init",
            Event::TurnStart { .. } => "turn_start",
            Event::Thinking { .. } => "thinking",
            Event::ThinkingDelta { .. } => "thinking_delta",
            Event::Message { .. } => "message",
            Event::MessageDelta { .. } => "message_delta",
            Event::ToolUse { .. } => "tool_use",
            Event::Bash { .. } => "bash",
            Event::FileRead { .. } => "file_read",
            Event::FileWrite { .. } => "file_write",
            Event::FileCreate { .. } => "file_create",
            Event::FileDelete { .. } => "file_delete",
            Event::DirectoryList { .. } => "directory_list",
            Event::Result { .. } => "result",
            Event::Error { .. } => "error",
            Event::Warning { .. } => "warning",
            Event::Raw { .. } => "raw",
            Event::UserMessage { .. } => "user_message",
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Event::Init { timestamp, .. }
            | Event::TurnStart { timestamp, .. }
            | Event::Thinking { timestamp, .. }
            | Event::ThinkingDelta { timestamp, .. }
            | Event::Message { timestamp, .. }
            | Event::MessageDelta { timestamp, .. }
            | Event::ToolUse { timestamp, .. }
            | Event::Bash { timestamp, .. }
            | Event::FileRead { timestamp, .. }
            | Event::FileWrite { timestamp, .. }
            | Event::FileCreate { timestamp, .. }
            | Event::FileDelete { timestamp, .. }
            | Event::DirectoryList { timestamp, .. }
            | Event::Result { timestamp, .. }
            | Event::Error { timestamp, .. }
            | Event::Warning { timestamp, .. }
            | Event::Raw { timestamp, .. }
            | Event::UserMessage { timestamp, .. } => *timestamp,
        }
    }

    pub fn agent(&self) -> &str {
        match self {
            Event::Init { agent, .. }
            | Event::TurnStart { agent, .. }
            | Event::Thinking { agent, .. }
            | Event::ThinkingDelta { agent, .. }
            | Event::Message { agent, .. }
            | Event::MessageDelta { agent, .. }
            | Event::ToolUse { agent, .. }
            | Event::Bash { agent, .. }
            | Event::FileRead { agent, .. }
            | Event::FileWrite { agent, .. }
            | Event::FileCreate { agent, .. }
            | Event::FileDelete { agent, .. }
            | Event::DirectoryList { agent, .. }
            | Event::Result { agent, .. }
            | Event::Error { agent, .. }
            | Event::Warning { agent, .. }
            | Event::Raw { agent, .. }
            | Event::UserMessage { agent, .. } => agent,
        }
    }

    /// Priority class (spec §3): critical/important/verbose.
    pub fn priority(&self) -> Priority {
        match self {
            Event::Error { .. }
            | Event::Result { .. }
            | Event::FileWrite { .. }
            | Event::FileDelete { .. }
            | Event::FileCreate { .. } => Priority::Critical,
            Event::ToolUse { .. }
            | Event::Bash { .. }
            | Event::FileRead { .. }
            | Event::Thinking { .. }
            | Event::Message { .. } => Priority::Important,
            _ => Priority::Verbose,
        }
    }

    /// True for the event types the summarizer counts toward `tool_call_count`
    /// (spec §4.3, §8): file ops and bash commands.
    pub fn counts_as_tool_call(&self) -> bool {
        matches!(
            self,
            Event::FileRead { .. }
                | Event::FileWrite { .. }
                | Event::FileCreate { .. }
                | Event::FileDelete { .. }
                | Event::Bash { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn event_type_matches_tag() {
        let e = Event::FileWrite {
            agent: "a".into(),
            timestamp: ts(),
            path: "/x".into(),
        };
        assert_eq!(e.event_type(), "file_write");
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "file_write");
    }

    #[test]
    fn priority_classes_match_spec() {
        assert_eq!(
            Event::Error {
                agent: "a".into(),
                timestamp: ts(),
                message: "m".into()
            }
            .priority(),
            Priority::Critical
        );
        assert_eq!(
            Event::Bash {
                agent: "a".into(),
                timestamp: ts(),
                tool: "shell".into(),
                command: "ls".into(),
                exit_code: None
            }
            .priority(),
            Priority::Important
        );
        assert_eq!(
            Event::Raw {
                agent: "a".into(),
                timestamp: ts(),
                content: "?".into()
            }
            .priority(),
            Priority::Verbose
        );
    }

    #[test]
    fn roundtrip_through_json() {
        let e = Event::Result {
            agent: "a".into(),
            timestamp: ts(),
            status: ResultStatus::Success,
            duration_ms: Some(5000),
            usage: None,
        };
        let json = serde_json::to_string(&e).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(e, back);
    }
}
