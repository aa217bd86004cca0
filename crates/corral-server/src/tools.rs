// SPDX-License-Identifier: MIT

//! Tool registry and dispatch for `Spawn`, `Status`, `Stop`, `Tasks` (spec
//! §4.7). Tool names are matched case-insensitively; a caller may write
//! `spawn`, `Spawn`, or `SPAWN`.

use corral_core::{AgentRecord, Effort, Mode, OrchestratorError};
use corral_manager::{compute_path_lca, AgentManager, SpawnArgs};
use corral_summarize::{summarize, Since};
use serde_json::{json, Value};
use std::path::PathBuf;

/// One entry in the `tools/list` response, before an update notice (if any)
/// is appended to its description.
pub struct ToolDescriptor {
    pub name: &'static str,
    pub base_description: &'static str,
    pub input_schema: Value,
}

pub fn registry() -> Vec<ToolDescriptor> {
    vec![
        ToolDescriptor {
            name: "Spawn",
            base_description: "Start a new coding-agent subprocess under a task name.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task_name": {"type": "string"},
                    "agent_type": {"type": "string"},
                    "prompt": {"type": "string"},
                    "cwd": {"type": "string"},
                    "mode": {"type": "string", "enum": ["plan", "edit", "ralph"]},
                    "effort": {"type": "string", "enum": ["fast", "default", "detailed"]},
                },
                "required": ["task_name", "agent_type", "prompt"],
            }),
        },
        ToolDescriptor {
            name: "Status",
            base_description: "Report agent status and summaries for a task or parent session.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task_name": {"type": "string"},
                    "parent_session_id": {"type": "string"},
                    "filter": {
                        "type": "string",
                        "enum": ["running", "completed", "failed", "stopped", "all"],
                    },
                    "since": {"type": "string"},
                },
            }),
        },
        ToolDescriptor {
            name: "Stop",
            base_description: "Terminate the agents running under a task name.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "task_name": {"type": "string"},
                    "agent_id": {"type": "string"},
                },
                "required": ["task_name"],
            }),
        },
        ToolDescriptor {
            name: "Tasks",
            base_description: "List known tasks ordered by most recent activity.",
            input_schema: json!({
                "type": "object",
                "properties": {
                    "limit": {"type": "integer"},
                },
            }),
        },
    ]
}

fn field_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn require_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, OrchestratorError> {
    field_str(args, key)
        .ok_or_else(|| OrchestratorError::InvalidArgument(format!("missing required field: {key}")))
}

fn record_json(record: &AgentRecord) -> Value {
    json!({
        "task_name": record.task_name,
        "agent_id": record.agent_id.to_string(),
        "agent_type": record.agent_type,
        "status": record.status.as_str(),
        "started_at": record.started_at,
    })
}

/// Dispatches one `tools/call` invocation by name (case-insensitive), and
/// returns the JSON value that becomes the envelope's `result` — either the
/// tool's shaped output or `{"error": "..."}"` (spec §7).
pub async fn dispatch(manager: &AgentManager, name: &str, arguments: &Value) -> Value {
    let outcome = match name.to_lowercase().as_str() {
        "spawn" => spawn(manager, arguments).await,
        "status" => status(manager, arguments),
        "stop" => stop(manager, arguments).await,
        "tasks" => tasks(manager, arguments),
        other => Err(OrchestratorError::InvalidArgument(format!(
            "unknown tool: {other}"
        ))),
    };

    match outcome {
        Ok(value) => value,
        Err(err) => json!({ "error": err.to_string(), "kind": err.kind() }),
    }
}

async fn spawn(manager: &AgentManager, args: &Value) -> Result<Value, OrchestratorError> {
    let task_name = require_str(args, "task_name")?.to_string();
    let agent_type = require_str(args, "agent_type")?.to_string();
    let prompt = require_str(args, "prompt")?.to_string();
    let cwd = PathBuf::from(field_str(args, "cwd").unwrap_or("."));
    let mode = match field_str(args, "mode") {
        Some(m) => Mode::parse(m)?,
        None => Mode::default(),
    };
    let effort = match field_str(args, "effort") {
        Some(e) => Effort::parse(e)?,
        None => Effort::default(),
    };

    let parent_session_id = std::env::var("AGENT_SESSION_ID").ok();
    let mut cwds: Vec<String> = manager
        .list_by_task(&task_name)
        .iter()
        .map(|r| r.cwd.display().to_string())
        .collect();
    cwds.push(cwd.display().to_string());
    let workspace_dir = compute_path_lca(&cwds).map(PathBuf::from);

    let record = manager
        .spawn(
            SpawnArgs {
                task_name,
                agent_type,
                prompt,
                cwd,
                mode,
                effort,
                parent_session_id,
                workspace_dir,
            },
            manager.now(),
        )
        .await?;

    Ok(record_json(&record))
}

fn status(manager: &AgentManager, args: &Value) -> Result<Value, OrchestratorError> {
    let task_name = field_str(args, "task_name");
    let parent_session_id = field_str(args, "parent_session_id");

    let mut records = match (task_name, parent_session_id) {
        (Some(t), _) => manager.list_by_task(t),
        (None, Some(p)) => manager.list_by_parent_session(p),
        (None, None) => {
            return Err(OrchestratorError::InvalidArgument(
                "status requires task_name or parent_session_id".to_string(),
            ))
        }
    };

    let filter = match field_str(args, "filter") {
        Some(f) => corral_core::AgentStatus::parse_filter(f)?,
        None => Some(corral_core::AgentStatus::Running),
    };
    if let Some(status) = filter {
        records.retain(|r| r.status == status);
    }
    records.sort_by_key(|r| r.started_at);

    let since = field_str(args, "since").map(|s| match s.parse::<usize>() {
        Ok(idx) => Since::Index(idx),
        Err(_) => Since::Timestamp(s.parse().unwrap_or_else(|_| manager.now())),
    });

    let agents: Vec<Value> = records
        .iter()
        .map(|record| {
            let id = record.agent_id.to_string();
            let events = manager
                .get_view(&id)
                .map(|v| v.events)
                .unwrap_or_default();

            let mut entry = serde_json::Map::new();
            entry.insert("agent_id".to_string(), json!(id));
            entry.insert("agent_type".to_string(), json!(record.agent_type));
            entry.insert("status".to_string(), json!(record.status.as_str()));
            entry.insert("started_at".to_string(), json!(record.started_at));
            entry.insert("completed_at".to_string(), json!(record.completed_at));
            entry.insert("pid".to_string(), json!(record.pid));
            match since {
                Some(cursor) => {
                    entry.insert(
                        "delta".to_string(),
                        json!(corral_summarize::get_delta(&events, cursor)),
                    );
                }
                None => {
                    entry.insert("summary".to_string(), json!(summarize(&events)));
                }
            }
            Value::Object(entry)
        })
        .collect();

    Ok(json!({
        "task_name": task_name,
        "parent_session_id": parent_session_id,
        "agents": agents,
    }))
}

async fn stop(manager: &AgentManager, args: &Value) -> Result<Value, OrchestratorError> {
    let task_name = require_str(args, "task_name")?;
    let agent_id = field_str(args, "agent_id");
    let outcome = manager.stop(task_name, agent_id, manager.now()).await;
    Ok(json!({
        "stopped": outcome.stopped,
        "already_stopped": outcome.already_stopped,
        "not_found": outcome.not_found,
    }))
}

fn tasks(manager: &AgentManager, args: &Value) -> Result<Value, OrchestratorError> {
    let limit = args
        .get("limit")
        .and_then(Value::as_u64)
        .unwrap_or(10) as usize;

    let all = manager.list_all();
    let mut by_task: std::collections::BTreeMap<String, Vec<AgentRecord>> =
        std::collections::BTreeMap::new();
    for record in all {
        by_task.entry(record.task_name.clone()).or_default().push(record);
    }

    let mut rows: Vec<(String, Value)> = by_task
        .into_iter()
        .map(|(task_name, records)| {
            let latest_activity = records
                .iter()
                .map(|r| r.completed_at.unwrap_or(r.started_at))
                .max()
                .unwrap_or(manager.now());
            let running = records.iter().filter(|r| r.status == corral_core::AgentStatus::Running).count();
            let row = json!({
                "task_name": task_name,
                "agent_count": records.len(),
                "running": running,
                "latest_activity": latest_activity,
                "statuses": records.iter().map(|r| r.status.as_str()).collect::<Vec<_>>(),
            });
            (task_name, row)
        })
        .collect();

    rows.sort_by(|a, b| {
        let ta = a.1["latest_activity"].as_str().unwrap_or("");
        let tb = b.1["latest_activity"].as_str().unwrap_or("");
        tb.cmp(ta)
    });
    rows.truncate(limit);

    Ok(json!({ "tasks": rows.into_iter().map(|(_, v)| v).collect::<Vec<_>>() }))
}
