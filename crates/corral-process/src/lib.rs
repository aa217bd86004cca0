// SPDX-License-Identifier: MIT

//! Agent Process (spec §4.4): owns one child, its log tail, and its
//! lifecycle transitions.
//!
//! Grounded on the teacher's `adapters/src/agent/claude.rs` spawn flow and
//! `adapters/src/subprocess.rs` timeout wrapper, adapted from tmux-session
//! spawning to direct child-process spawning (the spec requires a process
//! group the orchestrator owns directly, not a detached terminal multiplexer
//! session).

use chrono::{DateTime, Utc};
use corral_config::{build_command, VendorDescriptor};
use corral_core::{AgentId, AgentRecord, AgentStatus, Effort, Event, Mode, OrchestratorError};
use corral_parsers::parser_for;
use corral_storage::{atomic_write_json, read_json_tolerant, Layout};
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::{Child, Command};

const DEFAULT_RALPH_FILE: &str = "RALPH.md";
const STOP_GRACE: std::time::Duration = std::time::Duration::from_secs(5);

/// Dangerous `cwd` values that `spawn` always refuses, and that `ralph`
/// mode refuses even more strictly (spec §4.4).
const DANGEROUS_CWDS: &[&str] = &["/", "/usr", "/bin", "/sbin", "/etc", "/System"];

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("refusing to spawn in dangerous directory: {0}")]
    DangerousPath(String),
    #[error("ralph mode is disabled")]
    RalphDisabled,
    #[error("failed to spawn {vendor}: {message}")]
    Spawn { vendor: String, message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage error: {0}")]
    Storage(#[from] corral_storage::StorageError),
}

impl From<SpawnError> for OrchestratorError {
    fn from(err: SpawnError) -> Self {
        match err {
            SpawnError::DangerousPath(_) => OrchestratorError::DangerousPath(err.to_string()),
            SpawnError::RalphDisabled => OrchestratorError::InvalidArgument(err.to_string()),
            other => OrchestratorError::Internal(other.to_string()),
        }
    }
}

/// Checks `cwd` against the dangerous-path list, expanding `$HOME` (spec §4.4).
pub fn is_dangerous_cwd(cwd: &Path, home: Option<&Path>) -> bool {
    if let Some(home) = home {
        if cwd == home {
            return true;
        }
    }
    DANGEROUS_CWDS.iter().any(|d| cwd == Path::new(d))
}

pub struct SpawnRequest<'a> {
    pub task_name: String,
    pub agent_type: String,
    pub prompt: String,
    pub cwd: PathBuf,
    pub mode: Mode,
    pub effort: Effort,
    pub parent_session_id: Option<String>,
    pub workspace_dir: Option<PathBuf>,
    pub model: &'a str,
    pub ralph_enabled: bool,
    pub ralph_file: Option<&'a str>,
}

/// One supervised child and the state derived from its output.
pub struct AgentProcess {
    pub record: AgentRecord,
    child: Option<Child>,
    stdout_offset: u64,
    events: Vec<Event>,
}

impl AgentProcess {
    /// Builds the vendor command, validates `cwd`, spawns the child in its
    /// own process group, and persists `meta.json` (spec §4.4).
    pub async fn spawn(
        agent_id: AgentId,
        descriptor: &VendorDescriptor,
        request: SpawnRequest<'_>,
        layout: &Layout,
        home: Option<&Path>,
        now: DateTime<Utc>,
    ) -> Result<Self, SpawnError> {
        if is_dangerous_cwd(&request.cwd, home) {
            return Err(SpawnError::DangerousPath(request.cwd.display().to_string()));
        }
        if request.mode == Mode::Ralph {
            if !request.ralph_enabled {
                return Err(SpawnError::RalphDisabled);
            }
            if is_dangerous_cwd(&request.cwd, home) {
                return Err(SpawnError::DangerousPath(request.cwd.display().to_string()));
            }
        }

        let ralph_file = request.ralph_file.unwrap_or(DEFAULT_RALPH_FILE);
        let argv = build_command(descriptor, request.mode, request.model, &request.prompt, ralph_file);

        let agent_dir = layout.agent_dir(agent_id.as_str());
        std::fs::create_dir_all(&agent_dir)?;

        let env = ChildEnv {
            session_id: request.parent_session_id.as_deref(),
            workspace_dir: request.workspace_dir.as_deref(),
        };
        let spawn_result = spawn_child(
            &argv,
            &request.cwd,
            layout,
            agent_id.as_str(),
            descriptor.capture_stderr,
            &env,
        );
        let child = match spawn_result {
            Ok(child) => child,
            Err(message) => {
                // No partially-created directory is left behind on a spawn failure.
                let _ = std::fs::remove_dir_all(&agent_dir);
                return Err(SpawnError::Spawn {
                    vendor: request.agent_type.clone(),
                    message,
                });
            }
        };
        let pid = child.id();

        let record = AgentRecord {
            agent_id,
            task_name: request.task_name,
            agent_type: request.agent_type,
            prompt: request.prompt,
            cwd: request.cwd,
            mode: request.mode,
            effort: request.effort,
            pid,
            status: AgentStatus::Running,
            started_at: now,
            completed_at: None,
            parent_session_id: request.parent_session_id,
            workspace_dir: request.workspace_dir,
            base_dir: Some(layout.base_dir().to_path_buf()),
        };

        let process = Self {
            record,
            child: Some(child),
            stdout_offset: 0,
            events: Vec::new(),
        };
        process.save_meta(layout)?;
        Ok(process)
    }

    /// Tails `stdout.log` from the last offset, parsing complete lines only
    /// (spec §4.4 `read_new_events`, §9 partial-line safety).
    pub fn read_new_events(&mut self, layout: &Layout) -> std::io::Result<usize> {
        let path = layout.stdout_log_path(self.record.agent_id.as_str());
        let Ok(file) = std::fs::File::open(&path) else {
            return Ok(0);
        };
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.stdout_offset))?;

        let parser = parser_for(&self.record.agent_type);
        let mut added = 0;
        let mut offset = self.stdout_offset;
        let mut line = String::new();
        loop {
            line.clear();
            let n = reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            if !line.ends_with('\n') {
                break;
            }
            offset += n as u64;
            let trimmed = line.trim_end_matches('\n');
            if trimmed.is_empty() {
                continue;
            }
            let new_events = parser.parse(self.record.agent_id.as_str(), trimmed);
            added += new_events.len();
            self.events.extend(new_events);
        }
        self.stdout_offset = offset;
        Ok(added)
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// Reconciles status against the live process (spec §4.4
    /// `update_status_from_process`): a terminal `result` event wins; else a
    /// plain-text trailing line marks `completed`; otherwise `failed`.
    pub async fn update_status_from_process(&mut self, layout: &Layout, now: DateTime<Utc>) {
        if !self.record.status.is_terminal() {
            let still_running = match &mut self.child {
                Some(child) => matches!(child.try_wait(), Ok(None)),
                None => false,
            };
            if !still_running {
                self.finalize_after_exit(layout, now);
            }
        }
    }

    fn finalize_after_exit(&mut self, layout: &Layout, now: DateTime<Utc>) {
        let has_terminal_result = self
            .events
            .iter()
            .rev()
            .find_map(|e| match e {
                Event::Result { status, .. } => Some(*status),
                _ => None,
            });

        match has_terminal_result {
            Some(corral_core::ResultStatus::Success) => self.record.mark_completed(now),
            Some(corral_core::ResultStatus::Error) => self.record.mark_failed(now),
            None => {
                let path = layout.stdout_log_path(self.record.agent_id.as_str());
                if trailing_line_is_plain_text(&path) {
                    let completed_at = file_mtime(&path).unwrap_or(now);
                    self.record.mark_completed(completed_at);
                } else {
                    self.record.mark_failed(now);
                }
            }
        }
    }

    /// Sends a terminate signal to the process group and marks the record
    /// stopped, without waiting for the child to actually exit (spec §5:
    /// "`Stop` is non-blocking from the caller's perspective — it returns
    /// once signals are sent; final status is observed on the next status
    /// poll"). The grace-period wait and hard kill run in a detached task.
    /// Returns `false` if the agent was already non-running.
    pub async fn stop(&mut self, layout: &Layout, now: DateTime<Utc>) -> bool {
        if self.record.status.is_terminal() {
            return false;
        }
        if let Some(child) = self.child.take() {
            tokio::spawn(grace_then_kill(child));
        }
        self.record.mark_stopped(now);
        let _ = self.save_meta(layout);
        true
    }

    /// `completed_at - started_at` when terminal, else `now - started_at`
    /// (spec §4.4 `duration`, formatted per §4.3).
    pub fn duration(&self, now: DateTime<Utc>) -> String {
        let end = self.record.completed_at.unwrap_or(now);
        let elapsed = (end - self.record.started_at).num_milliseconds().max(0) as u64;
        corral_summarize::format_duration_ms(elapsed)
    }

    pub fn save_meta(&self, layout: &Layout) -> Result<(), corral_storage::StorageError> {
        let path = layout.meta_path(self.record.agent_id.as_str());
        atomic_write_json(&path, &self.record)
    }

    /// Returns `None` on any read/parse failure, never an error
    /// (spec §4.4 `load_from_disk`).
    pub fn load_from_disk(agent_id: &str, layout: &Layout) -> Option<AgentRecord> {
        read_json_tolerant(&layout.meta_path(agent_id))
    }

    /// Rehydrates a process entry from a persisted record with no owned
    /// child handle (spec §4.5: the manager's startup scan re-attaches to
    /// live PIDs rather than re-spawning). Events are populated by a
    /// subsequent `read_new_events` call against the existing `stdout.log`.
    pub fn from_record(record: AgentRecord) -> Self {
        Self {
            record,
            child: None,
            stdout_offset: 0,
            events: Vec::new(),
        }
    }

    /// Classifies a rehydrated record whose PID is no longer alive, the same
    /// way an owned child's exit would be classified (spec §4.5: "otherwise
    /// it is reclassified per §4.4 rules").
    pub fn mark_dead(&mut self, layout: &Layout, now: DateTime<Utc>) {
        self.finalize_after_exit(layout, now);
        let _ = self.save_meta(layout);
    }
}

/// Environment variables propagated to every spawned child (spec §6).
struct ChildEnv<'a> {
    session_id: Option<&'a str>,
    workspace_dir: Option<&'a Path>,
}

/// `capture_stderr` mirrors the vendor descriptor flag (spec §9 open
/// question): off by default, a sibling `stderr.log` only for vendors known
/// to emit diagnostics there. Stderr is never merged into the event stream.
fn spawn_child(
    argv: &[String],
    cwd: &Path,
    layout: &Layout,
    agent_id: &str,
    capture_stderr: bool,
    env: &ChildEnv<'_>,
) -> Result<Child, String> {
    let Some((program, args)) = argv.split_first() else {
        return Err("empty command".to_string());
    };

    let stdout_path = layout.stdout_log_path(agent_id);
    let stdout_file =
        std::fs::File::create(&stdout_path).map_err(|e| format!("stdout.log create failed: {e}"))?;
    let stderr_stdio = if capture_stderr {
        let stderr_path = layout.stderr_log_path(agent_id);
        let stderr_file = std::fs::File::create(&stderr_path)
            .map_err(|e| format!("stderr.log create failed: {e}"))?;
        Stdio::from(stderr_file)
    } else {
        Stdio::null()
    };

    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout_file))
        .stderr(stderr_stdio)
        .kill_on_drop(true);

    if let Some(session_id) = env.session_id {
        command.env("AGENT_SESSION_ID", session_id);
    }
    if let Some(workspace_dir) = env.workspace_dir {
        command.env("AGENT_WORKSPACE_DIR", workspace_dir);
    }

    apply_process_group(&mut command);

    command.spawn().map_err(|e| e.to_string())
}

#[cfg(unix)]
fn apply_process_group(command: &mut Command) {
    use std::os::unix::process::CommandExt;
    // A single signal to -pgid reaps the whole descendant tree (spec §9).
    command.process_group(0);
}

#[cfg(not(unix))]
fn apply_process_group(_command: &mut Command) {}

/// Signals the whole process group via the `kill` binary rather than a raw
/// `kill(2)` FFI call, keeping this workspace free of `unsafe` (spec §9:
/// "a single signal (negative PID to `kill`) cleans up transitively-spawned
/// processes").
#[cfg(unix)]
async fn terminate_process_group(child: &Child) {
    if let Some(pid) = child.id() {
        let _ = Command::new("kill")
            .arg("-TERM")
            .arg(format!("-{pid}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
    }
}

#[cfg(not(unix))]
async fn terminate_process_group(_child: &Child) {}

/// Grace-period wait plus hard kill, detached from the caller of `stop()`.
async fn grace_then_kill(mut child: Child) {
    terminate_process_group(&child).await;
    if tokio::time::timeout(STOP_GRACE, child.wait()).await.is_err() {
        let _ = child.start_kill();
    }
}

fn trailing_line_is_plain_text(path: &Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return false;
    };
    let Some(last_line) = contents.lines().last() else {
        return false;
    };
    serde_json::from_str::<serde_json::Value>(last_line).is_err()
}

/// `stdout.log`'s mtime, used as `completed_at` for a plain-text finish
/// (spec §4.4: "treat the file's mtime as `completed_at`").
fn file_mtime(path: &Path) -> Option<DateTime<Utc>> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(DateTime::<Utc>::from(modified))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dangerous_cwd_matches_listed_paths() {
        assert!(is_dangerous_cwd(Path::new("/"), None));
        assert!(is_dangerous_cwd(Path::new("/etc"), None));
        assert!(!is_dangerous_cwd(Path::new("/home/me/project"), None));
    }

    #[test]
    fn home_directory_is_dangerous() {
        let home = Path::new("/home/me");
        assert!(is_dangerous_cwd(home, Some(home)));
    }

    #[test]
    fn trailing_json_line_is_not_plain_text() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "{\"type\":\"result\"}\n").unwrap();
        assert!(!trailing_line_is_plain_text(tmp.path()));
    }

    #[test]
    fn trailing_freeform_line_is_plain_text() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "All done, goodbye!\n").unwrap();
        assert!(trailing_line_is_plain_text(tmp.path()));
    }

    #[test]
    fn file_mtime_matches_the_filesystem() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "done\n").unwrap();
        let expected: DateTime<Utc> =
            std::fs::metadata(tmp.path()).unwrap().modified().unwrap().into();
        assert_eq!(file_mtime(tmp.path()), Some(expected));
    }

    #[test]
    fn file_mtime_is_none_for_a_missing_file() {
        assert_eq!(file_mtime(Path::new("/nonexistent/path/stdout.log")), None);
    }
}
