// SPDX-License-Identifier: MIT

//! Agent record and its enumerated fields (spec §3).

use crate::error::OrchestratorError;
use crate::id::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One of the enabled vendor CLIs. Stored as a plain string so new vendors
/// are additive (configuration-driven, not a closed Rust enum) — only the
/// event *parser* dialect (corral-parsers) is a closed set.
pub type AgentType = String;

/// Read-only, writes-permitted, or fully autonomous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Plan,
    Edit,
    Ralph,
}

impl Mode {
    pub fn parse(s: &str) -> Result<Self, OrchestratorError> {
        match s {
            "plan" => Ok(Mode::Plan),
            "edit" => Ok(Mode::Edit),
            "ralph" => Ok(Mode::Ralph),
            other => Err(OrchestratorError::InvalidArgument(format!(
                "unknown mode: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Plan => "plan",
            Mode::Edit => "edit",
            Mode::Ralph => "ralph",
        }
    }
}

impl Default for Mode {
    fn default() -> Self {
        Mode::Edit
    }
}

/// Effort maps to a vendor-specific model via the effort→model table (C9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effort {
    Fast,
    Default,
    Detailed,
}

impl Effort {
    pub fn parse(s: &str) -> Result<Self, OrchestratorError> {
        match s {
            "fast" => Ok(Effort::Fast),
            "default" => Ok(Effort::Default),
            "detailed" => Ok(Effort::Detailed),
            other => Err(OrchestratorError::InvalidArgument(format!(
                "unknown effort: {other}"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Effort::Fast => "fast",
            Effort::Default => "default",
            Effort::Detailed => "detailed",
        }
    }
}

impl Default for Effort {
    fn default() -> Self {
        Effort::Default
    }
}

/// Lifecycle status (spec §3 invariants: `completed_at` set iff `status != running`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl AgentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AgentStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Running => "running",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
            AgentStatus::Stopped => "stopped",
        }
    }

    /// Parses the `filter` parameter accepted by the `Status` tool, including
    /// the `all` sentinel which is not itself a status.
    pub fn parse_filter(s: &str) -> Result<Option<Self>, OrchestratorError> {
        match s {
            "all" => Ok(None),
            "running" => Ok(Some(AgentStatus::Running)),
            "completed" => Ok(Some(AgentStatus::Completed)),
            "failed" => Ok(Some(AgentStatus::Failed)),
            "stopped" => Ok(Some(AgentStatus::Stopped)),
            other => Err(OrchestratorError::InvalidArgument(format!(
                "unknown filter: {other}"
            ))),
        }
    }
}

/// On-disk/in-memory record for one supervised agent (spec §3, §4.6 `meta.json`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub agent_id: AgentId,
    pub task_name: String,
    pub agent_type: AgentType,
    pub prompt: String,
    pub cwd: PathBuf,
    pub mode: Mode,
    pub effort: Effort,
    pub pid: Option<u32>,
    pub status: AgentStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
}

impl AgentRecord {
    /// Invariant check used by tests and by `load_from_disk` validation.
    pub fn invariants_hold(&self) -> bool {
        let completed_consistent = match self.status {
            AgentStatus::Running => self.completed_at.is_none(),
            _ => self.completed_at.is_some(),
        };
        let ordered = match (self.started_at, self.completed_at) {
            (s, Some(c)) => s <= c,
            _ => true,
        };
        completed_consistent && ordered
    }

    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.status = AgentStatus::Completed;
        self.completed_at = Some(at);
    }

    pub fn mark_failed(&mut self, at: DateTime<Utc>) {
        self.status = AgentStatus::Failed;
        self.completed_at = Some(at);
    }

    pub fn mark_stopped(&mut self, at: DateTime<Utc>) {
        self.status = AgentStatus::Stopped;
        self.completed_at = Some(at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_record() -> AgentRecord {
        AgentRecord {
            agent_id: AgentId::new("claude-abc12345"),
            task_name: "t".into(),
            agent_type: "claude".into(),
            prompt: "do x".into(),
            cwd: PathBuf::from("/tmp/proj"),
            mode: Mode::Edit,
            effort: Effort::Default,
            pid: Some(123),
            status: AgentStatus::Running,
            started_at: "2026-01-01T00:00:00Z".parse().unwrap(),
            completed_at: None,
            parent_session_id: None,
            workspace_dir: None,
            base_dir: None,
        }
    }

    #[test]
    fn running_without_completed_at_is_valid() {
        assert!(base_record().invariants_hold());
    }

    #[test]
    fn running_with_completed_at_is_invalid() {
        let mut r = base_record();
        r.completed_at = Some("2026-01-01T00:01:00Z".parse().unwrap());
        assert!(!r.invariants_hold());
    }

    #[test]
    fn completed_requires_completed_at() {
        let mut r = base_record();
        r.status = AgentStatus::Completed;
        assert!(!r.invariants_hold());
        r.mark_completed("2026-01-01T00:01:00Z".parse().unwrap());
        assert!(r.invariants_hold());
    }

    #[test]
    fn completed_at_must_not_precede_started_at() {
        let mut r = base_record();
        r.status = AgentStatus::Failed;
        r.completed_at = Some("2025-12-31T23:59:00Z".parse().unwrap());
        assert!(!r.invariants_hold());
    }

    #[test]
    fn mode_and_effort_roundtrip_strings() {
        assert_eq!(Mode::parse("plan").unwrap().as_str(), "plan");
        assert_eq!(Effort::parse("detailed").unwrap().as_str(), "detailed");
        assert!(Mode::parse("bogus").is_err());
    }

    #[test]
    fn filter_all_maps_to_none() {
        assert_eq!(AgentStatus::parse_filter("all").unwrap(), None);
        assert_eq!(
            AgentStatus::parse_filter("running").unwrap(),
            Some(AgentStatus::Running)
        );
    }
}
