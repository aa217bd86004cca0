// SPDX-License-Identifier: MIT

//! Vendor event parsing (spec §4.1) and bash file-op inference (spec §4.2).
//!
//! One parser per vendor dialect behind a single trait, grounded on the
//! per-CLI branches in the teacher's session-log extraction
//! (`adapters/src/agent/log_entry.rs`), generalized from "extract entries
//! for the logger" into "normalize into the closed `Event` set".

mod bash;
mod claude;
mod codex;
mod gemini;

pub use bash::{infer_file_ops, InferredFileOps};

use chrono::Utc;
use corral_core::Event;
use serde_json::Value;

/// Vendor JSONL dialect. One parser implementation per vendor (spec §4.1);
/// kept as a trait so adding a CLI is additive, never a change to a central switch.
pub trait VendorParser {
    /// Parse one raw output line into zero-or-more normalized events.
    ///
    /// Total: a malformed JSON line or an unrecognized shape yields exactly
    /// one `Event::Raw` rather than an error.
    fn parse(&self, agent: &str, raw_line: &str) -> Vec<Event>;
}

pub struct CodexParser;
pub struct CursorParser;
pub struct GeminiParser;

/// `opencode` and `trae` have no documented JSONL dialect in the source
/// material; their output is carried through as `raw` events rather than
/// guessed at. Revisit if either publishes a stable event schema.
pub struct PassthroughParser;

impl VendorParser for CodexParser {
    fn parse(&self, agent: &str, raw_line: &str) -> Vec<Event> {
        codex::parse_line(agent, raw_line)
    }
}

impl VendorParser for CursorParser {
    fn parse(&self, agent: &str, raw_line: &str) -> Vec<Event> {
        claude::parse_line(agent, raw_line)
    }
}

impl VendorParser for GeminiParser {
    fn parse(&self, agent: &str, raw_line: &str) -> Vec<Event> {
        gemini::parse_line(agent, raw_line)
    }
}

impl VendorParser for PassthroughParser {
    fn parse(&self, agent: &str, raw_line: &str) -> Vec<Event> {
        vec![raw_event(agent, raw_line)]
    }
}

/// Resolve the parser for a vendor name. `claude` reuses the Cursor dialect
/// (spec §4.1: "Claude: reuses the Cursor dialect").
pub fn parser_for(vendor: &str) -> Box<dyn VendorParser + Send + Sync> {
    match vendor {
        "codex" => Box::new(CodexParser),
        "cursor" | "claude" => Box::new(CursorParser),
        "gemini" => Box::new(GeminiParser),
        _ => Box::new(PassthroughParser),
    }
}

/// Shared fallback: malformed JSON or an unrecognized shape becomes `raw`,
/// never an error (spec §4.1 failure semantics).
pub(crate) fn raw_event(agent: &str, content: &str) -> Event {
    tracing::debug!(agent, "line fell through to raw");
    Event::Raw {
        agent: agent.to_string(),
        timestamp: Utc::now(),
        content: content.to_string(),
    }
}

pub(crate) fn try_parse_json(raw_line: &str) -> Option<Value> {
    serde_json::from_str(raw_line).ok()
}

pub(crate) fn get_str<'a>(v: &'a Value, key: &str) -> Option<&'a str> {
    v.get(key).and_then(Value::as_str)
}

pub(crate) fn timestamp_or_now(v: &Value) -> chrono::DateTime<Utc> {
    get_str(v, "timestamp")
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_vendor_falls_back_to_passthrough() {
        let p = parser_for("opencode");
        let events = p.parse("a1", "anything at all");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Raw { .. }));
    }

    #[test]
    fn claude_reuses_cursor_dialect() {
        let line = r#"{"type":"system","subtype":"init","model":"opus","session_id":"s1"}"#;
        let a = parser_for("claude").parse("a1", line);
        let b = parser_for("cursor").parse("a1", line);
        assert_eq!(a.len(), b.len());
        assert_eq!(a[0].event_type(), b[0].event_type());
    }

    #[test]
    fn malformed_json_yields_single_raw_event() {
        let p = parser_for("codex");
        let events = p.parse("a1", "not json at all {{{");
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Raw { .. }));
    }
}
