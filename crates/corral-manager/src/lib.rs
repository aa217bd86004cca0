// SPDX-License-Identifier: MIT

//! Agent Manager (spec §4.5): lifecycle registry, concurrency caps,
//! retention, and lookup over the agents a single process supervises.
//!
//! Grounded on the teacher's `daemon/src/lifecycle.rs` (an in-memory
//! registry driving worker/job state) and `daemon/src/lifecycle/reconcile.rs`
//! (rehydrating persisted state against live processes after a restart),
//! adapted from an event-sourced multi-entity runtime into a flat agent
//! registry with direct spawn/stop calls.

use chrono::{DateTime, Utc};
use corral_config::{Config, ModelOverrides};
use corral_core::id::new_agent_id;
use corral_core::{
    AgentRecord, AgentStatus, Clock, DeltaSummary, Effort, Event, IdGen, Mode, OrchestratorError,
    Summary, SystemClock, UuidIdGen,
};
use corral_process::{AgentProcess, SpawnRequest};
use corral_storage::Layout;
use corral_summarize::{get_delta, summarize, Since};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_MAX_CONCURRENT: usize = 10;
const DEFAULT_MAX_COMPLETED: usize = 50;
const DEFAULT_RALPH_FILE: &str = "RALPH.md";

/// Tunables for one manager instance (spec §4.5, §4.6 env overrides).
pub struct ManagerOptions {
    pub max_concurrent: usize,
    pub max_completed: usize,
    pub ralph_enabled: bool,
    pub ralph_file: String,
    pub home: Option<PathBuf>,
}

impl Default for ManagerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            max_completed: DEFAULT_MAX_COMPLETED,
            ralph_enabled: true,
            ralph_file: DEFAULT_RALPH_FILE.to_string(),
            home: std::env::var_os("HOME").map(PathBuf::from),
        }
    }
}

/// Caller-supplied arguments to `spawn` (spec §4.5).
pub struct SpawnArgs {
    pub task_name: String,
    pub agent_type: String,
    pub prompt: String,
    pub cwd: PathBuf,
    pub mode: Mode,
    pub effort: Effort,
    pub parent_session_id: Option<String>,
    pub workspace_dir: Option<PathBuf>,
}

/// Immutable snapshot of one agent's record plus its accumulated events
/// (spec §9: "expose cursor-only access that returns an immutable snapshot").
#[derive(Debug, Clone)]
pub struct AgentView {
    pub record: AgentRecord,
    pub events: Vec<Event>,
}

/// Result shape of a broadcast stop (spec §4.7 `Stop` tool).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOutcome {
    pub stopped: Vec<String>,
    pub already_stopped: Vec<String>,
    pub not_found: Vec<String>,
}

struct Inner {
    processes: HashMap<String, AgentProcess>,
    config: Config,
    overrides: ModelOverrides,
}

/// Lifecycle registry for every supervised agent (spec §4.5).
///
/// The map lives behind a `parking_lot::Mutex`: the manager's concurrency
/// model (§5) is single-threaded cooperative, so the lock is a cheap safety
/// net rather than a contention point. It is acquired only for the
/// synchronous portion of each operation — any call into an `AgentProcess`
/// method that awaits removes the entry from the map first and reinserts it
/// afterward, so the guard is never held across an `.await`.
pub struct AgentManager {
    inner: Mutex<Inner>,
    layout: Layout,
    options: ManagerOptions,
    id_gen: Arc<dyn IdGen>,
    clock: Arc<dyn Clock>,
}

impl AgentManager {
    pub fn new(layout: Layout, config: Config, options: ManagerOptions) -> Self {
        Self::with_id_gen(layout, config, options, Arc::new(UuidIdGen))
    }

    pub fn with_id_gen(
        layout: Layout,
        config: Config,
        options: ManagerOptions,
        id_gen: Arc<dyn IdGen>,
    ) -> Self {
        Self::with_id_gen_and_clock(layout, config, options, id_gen, Arc::new(SystemClock))
    }

    /// Injects both the ID generator and the clock (spec §9: "timestamps ...
    /// produced through a `Clock` trait"), used by tests that need
    /// deterministic IDs and a controllable `now()` together.
    pub fn with_id_gen_and_clock(
        layout: Layout,
        config: Config,
        options: ManagerOptions,
        id_gen: Arc<dyn IdGen>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                processes: HashMap::new(),
                config,
                overrides: ModelOverrides::default(),
            }),
            layout,
            options,
            id_gen,
            clock,
        }
    }

    /// The manager's clock (`SystemClock` in production): the RPC layer uses
    /// this rather than calling `Utc::now()` directly, so every
    /// timestamp-producing call site shares one injectable source of time.
    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn enabled_vendors(&self) -> Vec<String> {
        self.inner.lock().config.enabled_vendors()
    }

    /// Scans `<base_dir>/agents/*` and rehydrates records, re-attaching to
    /// live PIDs where possible (spec §4.5: "the first [lookup] after
    /// startup ... scans ... and rehydrates records, attempting to
    /// re-attach to live PIDs"). Call once at startup before serving RPCs.
    pub fn initialize(&self, now: DateTime<Utc>) {
        let agents_dir = self.layout.agents_dir();
        let Ok(read_dir) = std::fs::read_dir(&agents_dir) else {
            return;
        };

        let mut rehydrated = 0;
        for entry in read_dir.flatten() {
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let agent_id = entry.file_name().to_string_lossy().to_string();
            let Some(record) = AgentProcess::load_from_disk(&agent_id, &self.layout) else {
                continue;
            };

            let mut process = AgentProcess::from_record(record);
            let _ = process.read_new_events(&self.layout);

            if process.record.status == AgentStatus::Running {
                let alive = process
                    .record
                    .pid
                    .map(|pid| pid_is_alive(pid, &process.record.agent_type))
                    .unwrap_or(false);
                if !alive {
                    process.mark_dead(&self.layout, now);
                }
            }

            self.inner.lock().processes.insert(agent_id, process);
            rehydrated += 1;
        }
        if rehydrated > 0 {
            info!(count = rehydrated, "rehydrated agents from disk");
        }
    }

    /// Builds the command, validates inputs, and spawns the child (spec
    /// §4.5): checks `running_count < max_concurrent`, then `cli_available`,
    /// then delegates to `AgentProcess::spawn`.
    pub async fn spawn(
        &self,
        args: SpawnArgs,
        now: DateTime<Utc>,
    ) -> Result<AgentRecord, OrchestratorError> {
        let (descriptor, model) = {
            let inner = self.inner.lock();
            if !inner.config.is_enabled(&args.agent_type) {
                return Err(OrchestratorError::InvalidArgument(format!(
                    "unknown or disabled agent_type: {}",
                    args.agent_type
                )));
            }

            let running = inner
                .processes
                .values()
                .filter(|p| !p.record.status.is_terminal())
                .count();
            if running >= self.options.max_concurrent {
                return Err(OrchestratorError::ResourceExhausted(format!(
                    "max_concurrent ({}) reached",
                    self.options.max_concurrent
                )));
            }

            let descriptor = inner
                .config
                .descriptor(&args.agent_type)
                .cloned()
                .ok_or_else(|| {
                    OrchestratorError::InvalidArgument(format!(
                        "unknown agent_type: {}",
                        args.agent_type
                    ))
                })?;
            let model = inner
                .overrides
                .resolve(&inner.config, &args.agent_type, args.effort)
                .map(|m| m.to_string())
                .ok_or_else(|| {
                    OrchestratorError::Internal(format!(
                        "no model configured for {}",
                        args.agent_type
                    ))
                })?;
            (descriptor, model)
        };

        if !cli_available(&descriptor.cli_command) {
            return Err(OrchestratorError::CliMissing(descriptor.cli_command.clone()));
        }

        let agent_id = new_agent_id(&args.agent_type, self.id_gen.as_ref());
        let request = SpawnRequest {
            task_name: args.task_name,
            agent_type: args.agent_type,
            prompt: args.prompt,
            cwd: args.cwd,
            mode: args.mode,
            effort: args.effort,
            parent_session_id: args.parent_session_id,
            workspace_dir: args.workspace_dir,
            model: &model,
            ralph_enabled: self.options.ralph_enabled,
            ralph_file: Some(self.options.ralph_file.as_str()),
        };

        let process = AgentProcess::spawn(
            agent_id,
            &descriptor,
            request,
            &self.layout,
            self.options.home.as_deref(),
            now,
        )
        .await?;

        let record = process.record.clone();
        self.inner
            .lock()
            .processes
            .insert(record.agent_id.to_string(), process);
        self.evict_completed_beyond_retention();
        Ok(record)
    }

    pub fn get(&self, id: &str) -> Option<AgentRecord> {
        self.inner.lock().processes.get(id).map(|p| p.record.clone())
    }

    /// Snapshot of one agent's record and full event log (spec §9
    /// `get_view`).
    pub fn get_view(&self, id: &str) -> Option<AgentView> {
        self.inner.lock().processes.get(id).map(|p| AgentView {
            record: p.record.clone(),
            events: p.events().to_vec(),
        })
    }

    pub fn summary_for(&self, id: &str) -> Option<Summary> {
        self.get_view(id).map(|v| summarize(&v.events))
    }

    pub fn delta_for(&self, id: &str, since: Since) -> Option<DeltaSummary> {
        self.get_view(id).map(|v| get_delta(&v.events, since))
    }

    pub fn list_all(&self) -> Vec<AgentRecord> {
        self.inner.lock().processes.values().map(|p| p.record.clone()).collect()
    }

    pub fn list_running(&self) -> Vec<AgentRecord> {
        self.inner
            .lock()
            .processes
            .values()
            .filter(|p| p.record.status == AgentStatus::Running)
            .map(|p| p.record.clone())
            .collect()
    }

    pub fn list_completed(&self) -> Vec<AgentRecord> {
        self.inner
            .lock()
            .processes
            .values()
            .filter(|p| p.record.status.is_terminal())
            .map(|p| p.record.clone())
            .collect()
    }

    pub fn list_by_task(&self, task_name: &str) -> Vec<AgentRecord> {
        self.inner
            .lock()
            .processes
            .values()
            .filter(|p| p.record.task_name == task_name)
            .map(|p| p.record.clone())
            .collect()
    }

    pub fn list_by_parent_session(&self, parent_session_id: &str) -> Vec<AgentRecord> {
        self.inner
            .lock()
            .processes
            .values()
            .filter(|p| p.record.parent_session_id.as_deref() == Some(parent_session_id))
            .map(|p| p.record.clone())
            .collect()
    }

    /// Refreshes every running agent's event tail and status, called on a
    /// tick by the server's tailer loop (spec §9 "tail without polling
    /// churn").
    pub async fn refresh_all(&self, now: DateTime<Utc>) {
        let running_ids: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .processes
                .iter()
                .filter(|(_, p)| p.record.status == AgentStatus::Running)
                .map(|(id, _)| id.clone())
                .collect()
        };
        for id in running_ids {
            self.refresh_one(&id, now).await;
        }
    }

    async fn refresh_one(&self, id: &str, now: DateTime<Utc>) {
        let mut process = {
            let mut inner = self.inner.lock();
            match inner.processes.remove(id) {
                Some(p) => p,
                None => return,
            }
        };
        if let Err(err) = process.read_new_events(&self.layout) {
            warn!(agent_id = %id, error = %err, "failed to tail stdout.log");
        }
        process.update_status_from_process(&self.layout, now).await;
        self.inner.lock().processes.insert(id.to_string(), process);
    }

    /// Stops every agent matching `task_name` (and `agent_id` when given),
    /// returning the broadcast result (spec §4.5 `stop`/`stop_by_task`).
    pub async fn stop(
        &self,
        task_name: &str,
        agent_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StopOutcome {
        let candidate_ids: Vec<String> = {
            let inner = self.inner.lock();
            match agent_id {
                Some(id) => inner
                    .processes
                    .get(id)
                    .filter(|p| p.record.task_name == task_name)
                    .map(|p| vec![p.record.agent_id.to_string()])
                    .unwrap_or_default(),
                None => inner
                    .processes
                    .values()
                    .filter(|p| p.record.task_name == task_name)
                    .map(|p| p.record.agent_id.to_string())
                    .collect(),
            }
        };

        let mut outcome = StopOutcome::default();
        if candidate_ids.is_empty() {
            outcome
                .not_found
                .push(agent_id.unwrap_or(task_name).to_string());
            return outcome;
        }

        for id in candidate_ids {
            if self.stop_one(&id, now).await {
                outcome.stopped.push(id);
            } else {
                outcome.already_stopped.push(id);
            }
        }
        outcome
    }

    async fn stop_one(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut process = {
            let mut inner = self.inner.lock();
            match inner.processes.remove(id) {
                Some(p) => p,
                None => return false,
            }
        };
        let stopped = process.stop(&self.layout, now).await;
        self.inner.lock().processes.insert(id.to_string(), process);
        stopped
    }

    pub fn set_model_override(&self, vendor: &str, effort: Effort, model: &str) {
        self.inner.lock().overrides.set(vendor, effort, model);
    }

    pub fn resolve_model(&self, vendor: &str, effort: Effort) -> Option<String> {
        let inner = self.inner.lock();
        inner
            .overrides
            .resolve(&inner.config, vendor, effort)
            .map(|m| m.to_string())
    }

    /// Evicts the oldest completed records beyond `max_completed`, removing
    /// their on-disk directories too (spec §6: "eviction removes whole agent
    /// directories"). Never touches running agents.
    fn evict_completed_beyond_retention(&self) {
        let mut completed: Vec<(String, DateTime<Utc>)> = {
            let inner = self.inner.lock();
            inner
                .processes
                .iter()
                .filter(|(_, p)| p.record.status.is_terminal())
                .map(|(id, p)| (id.clone(), p.record.completed_at.unwrap_or(p.record.started_at)))
                .collect()
        };
        if completed.len() <= self.options.max_completed {
            return;
        }
        completed.sort_by_key(|(_, completed_at)| *completed_at);
        let excess = completed.len() - self.options.max_completed;

        let mut inner = self.inner.lock();
        for (id, _) in completed.into_iter().take(excess) {
            inner.processes.remove(&id);
            let _ = std::fs::remove_dir_all(self.layout.agent_dir(&id));
        }
    }
}

/// Longest common ancestor of non-empty, trimmed paths (spec §4.5
/// `compute_path_lca`, §8 seed test 1). `None` when no path survives
/// trimming or no directory segment beyond the root is shared.
pub fn compute_path_lca(paths: &[String]) -> Option<String> {
    let components: Vec<Vec<&str>> = paths
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(|p| p.split('/').collect())
        .collect();

    if components.is_empty() {
        return None;
    }

    let shortest = components.iter().map(|c| c.len()).min().unwrap_or(0);
    let mut common = Vec::new();
    for i in 0..shortest {
        let segment = components[0][i];
        if components.iter().all(|c| c[i] == segment) {
            common.push(segment);
        } else {
            break;
        }
    }

    if common.len() <= 1 {
        return None;
    }
    Some(common.join("/"))
}

/// Scans `PATH` for `cli_command` (spec §4.5 `cli_available`). Accepts an
/// absolute or relative path directly rather than searching `PATH` when the
/// command already contains a separator.
fn cli_available(cli_command: &str) -> bool {
    if cli_command.contains('/') {
        return Path::new(cli_command).is_file();
    }
    let Some(path_var) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path_var).any(|dir| dir.join(cli_command).is_file())
}

/// Whether `pid` still refers to a running process whose command line
/// contains `expected_program` (spec §4.5: "if pid still exists and matches
/// the command line, the agent is running"). Linux-only (`/proc`); other
/// platforms always report the process as gone, which is a conservative,
/// documented gap (see DESIGN.md) rather than a faked check.
#[cfg(target_os = "linux")]
fn pid_is_alive(pid: u32, expected_program: &str) -> bool {
    let proc_dir = format!("/proc/{pid}");
    if !Path::new(&proc_dir).exists() {
        return false;
    }
    match std::fs::read(format!("{proc_dir}/cmdline")) {
        Ok(bytes) => {
            let first_arg = bytes.split(|b| *b == 0).next().unwrap_or(&[]);
            String::from_utf8_lossy(first_arg).contains(expected_program)
        }
        Err(_) => true,
    }
}

#[cfg(not(target_os = "linux"))]
fn pid_is_alive(_pid: u32, _expected_program: &str) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_core::{AgentId, Mode};
    use tempfile::TempDir;

    fn test_manager(options: ManagerOptions) -> (AgentManager, TempDir) {
        let tmp = TempDir::new().expect("tempdir");
        let layout = Layout::new(tmp.path().to_path_buf());
        (AgentManager::new(layout, Config::defaults(), options), tmp)
    }

    fn fake_record(agent_id: &str, task_name: &str, status: AgentStatus) -> AgentRecord {
        let now: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().expect("ts");
        AgentRecord {
            agent_id: AgentId::new(agent_id),
            task_name: task_name.to_string(),
            agent_type: "claude".to_string(),
            prompt: "do x".to_string(),
            cwd: PathBuf::from("/tmp/proj"),
            mode: Mode::Edit,
            effort: Effort::Default,
            pid: None,
            status,
            started_at: now,
            completed_at: if status.is_terminal() { Some(now) } else { None },
            parent_session_id: None,
            workspace_dir: None,
            base_dir: None,
        }
    }

    #[test]
    fn compute_path_lca_common_ancestor() {
        let paths = vec![
            "/a/b/c/d/e".to_string(),
            "/a/b/c/d".to_string(),
            "/a/b/c".to_string(),
        ];
        assert_eq!(compute_path_lca(&paths), Some("/a/b/c".to_string()));
    }

    #[test]
    fn compute_path_lca_no_shared_root() {
        let paths = vec!["/home/u/p".to_string(), "/var/log/a".to_string()];
        assert_eq!(compute_path_lca(&paths), None);
    }

    #[test]
    fn compute_path_lca_ignores_blank_entries() {
        let paths = vec![
            "".to_string(),
            "  ".to_string(),
            "/u/x".to_string(),
            "/u/x/y".to_string(),
        ];
        assert_eq!(compute_path_lca(&paths), Some("/u/x".to_string()));
    }

    #[test]
    fn compute_path_lca_empty_input_is_none() {
        assert_eq!(compute_path_lca(&[]), None);
    }

    #[tokio::test]
    async fn task_isolation_stop_only_affects_matching_task() {
        let (manager, _tmp) = test_manager(ManagerOptions::default());
        {
            let mut inner = manager.inner.lock();
            inner.processes.insert(
                "A1".to_string(),
                AgentProcess::from_record(fake_record("A1", "X", AgentStatus::Running)),
            );
            inner.processes.insert(
                "A2".to_string(),
                AgentProcess::from_record(fake_record("A2", "X", AgentStatus::Running)),
            );
            inner.processes.insert(
                "A3".to_string(),
                AgentProcess::from_record(fake_record("A3", "Y", AgentStatus::Running)),
            );
        }

        let now: DateTime<Utc> = "2026-01-01T00:05:00Z".parse().expect("ts");
        let outcome = manager.stop("X", None, now).await;
        assert_eq!(outcome.stopped.len(), 2);
        assert!(outcome.stopped.contains(&"A1".to_string()));
        assert!(outcome.stopped.contains(&"A2".to_string()));

        assert_eq!(manager.get("A3").expect("a3").status, AgentStatus::Running);
    }

    #[tokio::test]
    async fn stop_on_unknown_task_reports_not_found() {
        let (manager, _tmp) = test_manager(ManagerOptions::default());
        let now: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().expect("ts");
        let outcome = manager.stop("nope", None, now).await;
        assert_eq!(outcome.not_found, vec!["nope".to_string()]);
        assert!(outcome.stopped.is_empty());
    }

    #[tokio::test]
    async fn spawn_rejects_unknown_agent_type() {
        let (manager, _tmp) = test_manager(ManagerOptions::default());
        let args = SpawnArgs {
            task_name: "t".to_string(),
            agent_type: "not-a-real-vendor".to_string(),
            prompt: "hi".to_string(),
            cwd: PathBuf::from("/tmp"),
            mode: Mode::Edit,
            effort: Effort::Default,
            parent_session_id: None,
            workspace_dir: None,
        };
        let now: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().expect("ts");
        let err = manager.spawn(args, now).await.expect_err("should reject");
        assert_eq!(err.kind(), "invalid_argument");
    }

    #[tokio::test]
    async fn spawn_rejects_at_concurrency_cap() {
        let mut options = ManagerOptions::default();
        options.max_concurrent = 0;
        let (manager, _tmp) = test_manager(options);
        let args = SpawnArgs {
            task_name: "t".to_string(),
            agent_type: "claude".to_string(),
            prompt: "hi".to_string(),
            cwd: PathBuf::from("/tmp"),
            mode: Mode::Edit,
            effort: Effort::Default,
            parent_session_id: None,
            workspace_dir: None,
        };
        let now: DateTime<Utc> = "2026-01-01T00:00:00Z".parse().expect("ts");
        let err = manager.spawn(args, now).await.expect_err("should reject");
        assert_eq!(err.kind(), "resource_exhausted");
        assert!(manager.list_all().is_empty());
    }

    #[test]
    fn retention_evicts_oldest_completed_beyond_cap() {
        let mut options = ManagerOptions::default();
        options.max_completed = 1;
        let (manager, tmp) = test_manager(options);

        let old = fake_record("old", "t", AgentStatus::Completed);
        let mut new = fake_record("new", "t", AgentStatus::Completed);
        new.completed_at = Some(old.completed_at.expect("old completed") + chrono::Duration::minutes(5));

        std::fs::create_dir_all(tmp.path().join("agents").join("old")).expect("mkdir");
        std::fs::create_dir_all(tmp.path().join("agents").join("new")).expect("mkdir");

        {
            let mut inner = manager.inner.lock();
            inner
                .processes
                .insert("old".to_string(), AgentProcess::from_record(old));
            inner
                .processes
                .insert("new".to_string(), AgentProcess::from_record(new));
        }

        manager.evict_completed_beyond_retention();

        assert!(manager.get("old").is_none());
        assert!(manager.get("new").is_some());
        assert!(!tmp.path().join("agents").join("old").exists());
    }

    #[test]
    fn cli_available_checks_absolute_path_directly() {
        let tmp = TempDir::new().expect("tempdir");
        let bin = tmp.path().join("fake-cli");
        std::fs::write(&bin, b"").expect("write");
        assert!(cli_available(bin.to_str().expect("utf8 path")));
        assert!(!cli_available(
            tmp.path().join("does-not-exist").to_str().expect("utf8 path")
        ));
    }

    proptest::proptest! {
        /// The LCA of any path repeated against itself plus one of its own
        /// descendants is the path itself, for any non-root depth.
        #[test]
        fn lca_of_a_path_and_its_descendant_is_the_path(
            segments in proptest::collection::vec("[a-z]{1,8}", 1..6),
            child in "[a-z]{1,8}",
        ) {
            let base = format!("/{}", segments.join("/"));
            let descendant = format!("{base}/{child}");
            let result = compute_path_lca(&[base.clone(), descendant]);
            proptest::prop_assert_eq!(result, Some(base));
        }
    }

    #[test]
    fn model_override_resolves_through_manager() {
        let (manager, _tmp) = test_manager(ManagerOptions::default());
        assert_eq!(
            manager.resolve_model("claude", Effort::Fast),
            Some("haiku".to_string())
        );
        manager.set_model_override("claude", Effort::Fast, "custom-fast");
        assert_eq!(
            manager.resolve_model("claude", Effort::Fast),
            Some("custom-fast".to_string())
        );
    }
}
