// SPDX-License-Identifier: MIT

//! Event-stream summarization and delta/cursor tracking (spec §4.3).
//!
//! Pure functions over `&[Event]` — no filesystem or clock access beyond
//! what the caller already attached to each event's `timestamp`.

use chrono::{DateTime, Utc};
use corral_core::{AgentRecord, DeltaSummary, Event, QuickStatus, ResultStatus, Summary};
use corral_parsers::infer_file_ops;

const BASH_COMMAND_EXPORT_LIMIT: usize = 200;
const ERROR_MESSAGE_LIMIT: usize = 500;
const RAW_ERROR_SCAN_WINDOW: usize = 20;
const DELTA_BASH_LIMIT: usize = 15;
const DELTA_MESSAGE_LIMIT: usize = 5;

const ERROR_KEYWORDS: &[&str] = &["error", "exception", "failed", "fatal", "panic"];

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Formats a millisecond duration the way the summarizer reports `duration`
/// (spec §4.3, §8 seed test: `7500ms` → `"7.5 seconds"`).
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 60_000 {
        format!("{:.1} seconds", ms as f64 / 1_000.0)
    } else {
        format!("{:.1} minutes", ms as f64 / 60_000.0)
    }
}

/// Fold a full event sequence into an aggregate `Summary` (spec §4.3).
pub fn summarize(events: &[Event]) -> Summary {
    let mut summary = Summary::default();
    let mut message_buffer = String::new();

    for event in events {
        match event {
            Event::FileCreate { path, .. } => {
                summary.files_created.insert(path.clone());
                summary.tool_call_count += 1;
            }
            Event::FileWrite { path, .. } => {
                summary.files_modified.insert(path.clone());
                summary.tool_call_count += 1;
            }
            Event::FileRead { path, .. } => {
                summary.files_read.insert(path.clone());
                summary.tool_call_count += 1;
            }
            Event::FileDelete { path, .. } => {
                summary.files_deleted.insert(path.clone());
                summary.tool_call_count += 1;
            }
            Event::Bash { command, .. } => {
                summary
                    .bash_commands
                    .push(truncate(command, BASH_COMMAND_EXPORT_LIMIT));
                let ops = infer_file_ops(command);
                summary.files_read.extend(ops.reads);
                summary.files_modified.extend(ops.writes);
                summary.files_deleted.extend(ops.deletes);
                summary.tool_call_count += 1;
            }
            Event::ToolUse { tool, .. } => {
                summary.tools_used.insert(tool.clone());
            }
            Event::Message { content, complete, .. } => {
                if *complete {
                    message_buffer.push_str(content);
                    summary.final_message = Some(std::mem::take(&mut message_buffer));
                } else {
                    message_buffer.push_str(content);
                }
            }
            Event::Error { message, .. } => {
                summary.errors.push(truncate(message, ERROR_MESSAGE_LIMIT));
            }
            Event::Warning { message, .. } => {
                summary.warnings.push(message.clone());
            }
            Event::Result {
                status,
                duration_ms,
                ..
            } => {
                if let Some(ms) = duration_ms {
                    summary.duration = Some(format_duration_ms(*ms));
                }
                if *status == ResultStatus::Error {
                    if let Some(ms) = duration_ms {
                        summary
                            .errors
                            .push(truncate(&format!("result failed after {ms}ms"), ERROR_MESSAGE_LIMIT));
                    }
                }
            }
            _ => {}
        }
    }

    for content in scan_raw_events_for_errors(events) {
        summary.errors.push(content);
    }

    summary
}

/// Keyword fallback scan of the last `RAW_ERROR_SCAN_WINDOW` `raw` events
/// (spec §4.3): catches vendor output that never reached an explicit `error`
/// event.
fn scan_raw_events_for_errors(events: &[Event]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Raw { content, .. } => Some(content),
            _ => None,
        })
        .rev()
        .take(RAW_ERROR_SCAN_WINDOW)
        .filter(|content| {
            let lower = content.to_lowercase();
            ERROR_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .map(|content| truncate(content, ERROR_MESSAGE_LIMIT))
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect()
}

/// Groups `message` fragments into boundary-separated runs and returns the
/// last `k`, each concatenated with no inserted separators (spec §4.3).
///
/// A run is a maximal consecutive sequence of `message` events, ended by
/// either a fragment with `complete = true` or any non-message event (which
/// is itself not part of any run). A trailing run with no terminator (stream
/// ended mid-message) is still returned.
pub fn get_last_messages(events: &[Event], k: usize) -> Vec<String> {
    let mut runs = Vec::new();
    let mut current = String::new();
    let mut in_run = false;

    for event in events {
        match event {
            Event::Message { content, complete, .. } => {
                current.push_str(content);
                in_run = true;
                if *complete {
                    runs.push(std::mem::take(&mut current));
                    in_run = false;
                }
            }
            _ => {
                if in_run {
                    runs.push(std::mem::take(&mut current));
                    in_run = false;
                }
            }
        }
    }
    if in_run && !current.is_empty() {
        runs.push(current);
    }

    let start = runs.len().saturating_sub(k);
    runs.split_off(start)
}

/// Where a delta starts: a strict timestamp cutoff or a slice index.
#[derive(Debug, Clone, Copy)]
pub enum Since {
    Timestamp(DateTime<Utc>),
    Index(usize),
}

/// Summary over events since a cursor, plus the next cursor (spec §4.3).
pub fn get_delta(events: &[Event], since: Since) -> DeltaSummary {
    let slice: &[Event] = match since {
        Since::Timestamp(cutoff) => {
            let start = events.partition_point(|e| e.timestamp() <= cutoff);
            &events[start..]
        }
        Since::Index(idx) => {
            let idx = idx.min(events.len());
            &events[idx..]
        }
    };

    let summary = summarize(slice);
    let new_tool_count = summary.tool_call_count;

    let new_messages: Vec<String> = slice
        .iter()
        .filter_map(|e| match e {
            Event::Message { content, complete: true, .. } => Some(content.clone()),
            _ => None,
        })
        .collect();
    let start = new_messages.len().saturating_sub(DELTA_MESSAGE_LIMIT);
    let new_messages = new_messages[start..].to_vec();

    let mut new_bash_commands = summary.bash_commands.clone();
    let bstart = new_bash_commands.len().saturating_sub(DELTA_BASH_LIMIT);
    new_bash_commands = new_bash_commands.split_off(bstart);

    let cursor = slice
        .last()
        .map(|e| e.timestamp().to_rfc3339())
        .or(match since {
            Since::Timestamp(cutoff) => Some(cutoff.to_rfc3339()),
            Since::Index(_) => None,
        });

    DeltaSummary {
        new_events_count: slice.len(),
        has_changes: !slice.is_empty(),
        new_files_created: summary.files_created,
        new_files_modified: summary.files_modified,
        new_files_read: summary.files_read,
        new_files_deleted: summary.files_deleted,
        new_bash_commands,
        new_messages,
        new_tool_count,
        new_errors: summary.errors,
        cursor,
    }
}

/// Compact status for a single agent's list-view row.
pub fn get_quick_status(record: &AgentRecord, summary: &Summary) -> QuickStatus {
    QuickStatus {
        agent_id: record.agent_id.to_string(),
        status: record.status.as_str().to_string(),
        tool_call_count: summary.tool_call_count,
        final_message: summary.final_message.clone(),
        duration: summary.duration.clone(),
    }
}

/// Compact status rows for a batch of agents (`Status` tool list view).
pub fn get_status_summary(rows: &[(AgentRecord, Summary)]) -> Vec<QuickStatus> {
    rows.iter()
        .map(|(record, summary)| get_quick_status(record, summary))
        .collect()
}
