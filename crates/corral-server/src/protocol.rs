// SPDX-License-Identifier: MIT

//! JSON-RPC 2.0 envelope types for the stdio transport (spec §4.7, §9
//! "newline-delimited JSON-RPC over stdio, framed per the MCP protocol").
//!
//! MCP itself is treated as an opaque transport here: we model only the
//! three methods the spec names (`initialize`, `tools/list`, `tools/call`)
//! rather than the full protocol surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inbound line, parsed before we know whether it is a request or a
/// fire-and-forget notification (no `id`).
#[derive(Debug, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

#[derive(Debug, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcProtocolError>,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    pub fn protocol_error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcProtocolError { code, message: message.into() }),
        }
    }
}

/// A transport-level failure (unknown method, unparseable params) as
/// distinct from a tool-level `OrchestratorError`, which is always carried
/// inside a successful envelope's `result` as `{"error": "..."}` (spec §7:
/// "the RPC dispatcher converts thrown errors into `{error: string}`
/// responses, never propagates to the transport").
#[derive(Debug, Serialize)]
pub struct RpcProtocolError {
    pub code: i64,
    pub message: String,
}

pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const PARSE_ERROR: i64 = -32700;
