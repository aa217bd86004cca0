// SPDX-License-Identifier: MIT

//! Shapes produced by the event summarizer (corral-summarize), kept here so
//! both the manager and the RPC server can depend on the data without
//! depending on the summarization logic itself.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Aggregate view over an agent's full event sequence (spec §3, §4.3).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Summary {
    pub files_created: BTreeSet<String>,
    pub files_modified: BTreeSet<String>,
    pub files_read: BTreeSet<String>,
    pub files_deleted: BTreeSet<String>,
    pub tools_used: BTreeSet<String>,
    pub tool_call_count: u64,
    pub bash_commands: Vec<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Result of `get_delta` (spec §4.3): a summary over new events plus cursor metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeltaSummary {
    pub new_events_count: usize,
    pub has_changes: bool,
    pub new_files_created: BTreeSet<String>,
    pub new_files_modified: BTreeSet<String>,
    pub new_files_read: BTreeSet<String>,
    pub new_files_deleted: BTreeSet<String>,
    pub new_bash_commands: Vec<String>,
    pub new_messages: Vec<String>,
    pub new_tool_count: u64,
    pub new_errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
}

/// Compact status for list views (`get_quick_status` / `get_status_summary`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuickStatus {
    pub agent_id: String,
    pub status: String,
    pub tool_call_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}
