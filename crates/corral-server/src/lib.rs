// SPDX-License-Identifier: MIT

//! RPC Server (spec §4.7): stdio line-framed JSON-RPC, tool registry,
//! dispatch, error shaping, and the version-update notice.
//!
//! Grounded on `codex-rs/mcp-server/src/lib.rs::run_main` — a stdin-reader
//! task, a dispatcher task, and a stdout-writer task connected by bounded
//! `mpsc` channels, joined until stdin reaches EOF. The teacher speaks a
//! 4-byte length-prefixed binary protocol instead of line-delimited JSON, so
//! this transport is adapted from the other example repo named for it in
//! DESIGN.md rather than from `groblegark-oddjobs`.

mod protocol;
mod tools;

use corral_manager::AgentManager;
use corral_version::ClientKind;
use parking_lot::Mutex;
use protocol::{RpcRequest, RpcResponse, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const CHANNEL_CAPACITY: usize = 128;
/// Tailer tick interval (spec §9 "tail without polling churn": "An upper
/// bound on the tick (≈ 250 ms) trades latency for CPU").
const TAIL_TICK: std::time::Duration = std::time::Duration::from_millis(250);

/// Shared state visible to every inbound request: the manager, and the
/// client/version fingerprint captured at `initialize` time (spec §4.8).
struct ServerState {
    manager: Arc<AgentManager>,
    package_name: String,
    current_version: String,
    client_kind: Mutex<ClientKind>,
    latest_known: Mutex<Option<String>>,
}

/// Runs the stdio JSON-RPC server until stdin closes. `package_name` and
/// `current_version` identify this binary on the npm registry for the
/// update-notice check (spec §4.8).
pub async fn run_main(
    manager: Arc<AgentManager>,
    package_name: String,
    current_version: String,
) -> io::Result<()> {
    let state = Arc::new(ServerState {
        manager: manager.clone(),
        package_name: package_name.clone(),
        current_version,
        client_kind: Mutex::new(ClientKind::Unknown),
        latest_known: Mutex::new(None),
    });

    tokio::spawn({
        let state = state.clone();
        async move {
            let entry = corral_version::check_for_update(
                manager.layout(),
                &state.package_name,
                manager.now(),
            )
            .await;
            if let Some(entry) = entry {
                *state.latest_known.lock() = Some(entry.latest);
            }
        }
    });

    let tailer_handle = tokio::spawn({
        let manager = state.manager.clone();
        async move {
            let mut ticker = tokio::time::interval(TAIL_TICK);
            loop {
                ticker.tick().await;
                manager.refresh_all(manager.now()).await;
            }
        }
    });

    let (incoming_tx, mut incoming_rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<Value>(CHANNEL_CAPACITY);

    let reader_handle = tokio::spawn(async move {
        let mut lines = BufReader::new(io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if incoming_tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    error!(error = %err, "stdin read failed");
                    break;
                }
            }
        }
    });

    let dispatch_handle = tokio::spawn({
        let state = state.clone();
        let outgoing_tx = outgoing_tx.clone();
        async move {
            while let Some(line) = incoming_rx.recv().await {
                let response = handle_line(&state, &line).await;
                if let Some(response) = response {
                    if outgoing_tx.send(response).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    drop(outgoing_tx);

    let writer_handle = tokio::spawn(async move {
        let mut stdout = io::stdout();
        while let Some(message) = outgoing_rx.recv().await {
            let mut line = match serde_json::to_string(&message) {
                Ok(s) => s,
                Err(err) => {
                    error!(error = %err, "failed to serialize response");
                    continue;
                }
            };
            line.push('\n');
            if stdout.write_all(line.as_bytes()).await.is_err() {
                break;
            }
            if stdout.flush().await.is_err() {
                break;
            }
        }
    });

    let _ = tokio::join!(reader_handle, dispatch_handle, writer_handle);
    tailer_handle.abort();
    info!("rpc server stdin closed, shutting down");
    Ok(())
}

async fn handle_line(state: &Arc<ServerState>, line: &str) -> Option<Value> {
    let request: RpcRequest = match serde_json::from_str(line) {
        Ok(r) => r,
        Err(err) => {
            debug!(error = %err, "failed to parse rpc request");
            return Some(
                serde_json::to_value(RpcResponse::protocol_error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("invalid JSON: {err}"),
                ))
                .ok()?,
            );
        }
    };

    if request.is_notification() {
        handle_notification(state, &request).await;
        return None;
    }

    let id = request.id.clone().unwrap_or(Value::Null);
    let response = match request.method.as_str() {
        "initialize" => RpcResponse::success(id, handle_initialize(state, &request.params)),
        "tools/list" => RpcResponse::success(id, handle_tools_list(state)),
        "tools/call" => match handle_tools_call(state, &request.params).await {
            Ok(result) => RpcResponse::success(id, result),
            Err((code, message)) => RpcResponse::protocol_error(id, code, message),
        },
        other => {
            warn!(method = other, "unknown rpc method");
            RpcResponse::protocol_error(
                id,
                METHOD_NOT_FOUND,
                format!("unknown method: {other}"),
            )
        }
    };

    serde_json::to_value(response).ok()
}

async fn handle_notification(state: &Arc<ServerState>, request: &RpcRequest) {
    if request.method == "notifications/initialized" {
        debug!("client acknowledged initialize");
        return;
    }
    let _ = state;
    debug!(method = %request.method, "ignoring unhandled notification");
}

fn handle_initialize(state: &Arc<ServerState>, params: &Value) -> Value {
    let client_name = params
        .get("clientInfo")
        .and_then(|c| c.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("");
    *state.client_kind.lock() = ClientKind::classify(client_name);

    json!({
        "protocolVersion": "2024-11-05",
        "serverInfo": { "name": state.package_name, "version": state.current_version },
        "capabilities": { "tools": {} },
    })
}

fn handle_tools_list(state: &Arc<ServerState>) -> Value {
    let notice = {
        let latest = state.latest_known.lock();
        latest.as_ref().and_then(|latest| {
            corral_version::update_notice(
                &state.current_version,
                latest,
                *state.client_kind.lock(),
                &state.package_name,
            )
        })
    };

    let tools: Vec<Value> = tools::registry()
        .into_iter()
        .map(|tool| {
            let description = match &notice {
                Some(notice) => format!("{} {notice}", tool.base_description),
                None => tool.base_description.to_string(),
            };
            json!({
                "name": tool.name,
                "description": description,
                "inputSchema": tool.input_schema,
            })
        })
        .collect();

    json!({ "tools": tools })
}

async fn handle_tools_call(
    state: &Arc<ServerState>,
    params: &Value,
) -> Result<Value, (i64, String)> {
    let name = params
        .get("name")
        .and_then(Value::as_str)
        .ok_or((INVALID_PARAMS, "tools/call requires a name".to_string()))?;
    let empty = json!({});
    let arguments = params.get("arguments").unwrap_or(&empty);

    let result = tools::dispatch(&state.manager, name, arguments).await;
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corral_config::Config;
    use corral_manager::ManagerOptions;
    use corral_storage::Layout;
    use tempfile::TempDir;

    fn test_state() -> (Arc<ServerState>, TempDir) {
        let tmp = TempDir::new().expect("tempdir");
        let layout = Layout::new(tmp.path().to_path_buf());
        let manager = Arc::new(AgentManager::new(layout, Config::defaults(), ManagerOptions::default()));
        let state = Arc::new(ServerState {
            manager,
            package_name: "corral".to_string(),
            current_version: "1.0.0".to_string(),
            client_kind: Mutex::new(ClientKind::Unknown),
            latest_known: Mutex::new(None),
        });
        (state, tmp)
    }

    #[test]
    fn initialize_classifies_client_from_client_info() {
        let (state, _tmp) = test_state();
        handle_initialize(&state, &json!({"clientInfo": {"name": "Claude Desktop"}}));
        assert_eq!(*state.client_kind.lock(), ClientKind::Claude);
    }

    #[test]
    fn tools_list_includes_all_four_tools() {
        let (state, _tmp) = test_state();
        let result = handle_tools_list(&state);
        let names: Vec<&str> = result["tools"]
            .as_array()
            .expect("array")
            .iter()
            .map(|t| t["name"].as_str().expect("name"))
            .collect();
        assert_eq!(names, vec!["Spawn", "Status", "Stop", "Tasks"]);
    }

    #[test]
    fn tools_list_appends_update_notice_when_outdated() {
        let (state, _tmp) = test_state();
        *state.latest_known.lock() = Some("2.0.0".to_string());
        *state.client_kind.lock() = ClientKind::Codex;
        let result = handle_tools_list(&state);
        let description = result["tools"][0]["description"].as_str().expect("desc");
        assert!(description.contains("codex mcp update corral"));
    }

    #[tokio::test]
    async fn tools_call_unknown_tool_reports_invalid_argument() {
        let (state, _tmp) = test_state();
        let result = handle_tools_call(&state, &json!({"name": "Bogus", "arguments": {}}))
            .await
            .expect("dispatch does not error at the protocol level");
        assert_eq!(result["kind"], "invalid_argument");
    }

    #[tokio::test]
    async fn tools_call_spawn_rejects_missing_fields() {
        let (state, _tmp) = test_state();
        let result = handle_tools_call(
            &state,
            &json!({"name": "Spawn", "arguments": {"task_name": "t"}}),
        )
        .await
        .expect("dispatch does not error at the protocol level");
        assert_eq!(result["kind"], "invalid_argument");
    }

    #[test]
    fn malformed_json_line_reports_parse_error() {
        let response = serde_json::to_value(RpcResponse::protocol_error(
            Value::Null,
            PARSE_ERROR,
            "invalid JSON: eof".to_string(),
        ))
        .expect("serializes");
        assert_eq!(response["error"]["code"], PARSE_ERROR);
    }
}
