// SPDX-License-Identifier: MIT

//! The closed error taxonomy surfaced to RPC callers (spec §7).

use thiserror::Error;

/// The only error kinds the RPC layer ever returns to a caller.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("cli not found on PATH: {0}")]
    CliMissing(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("dangerous path: {0}")]
    DangerousPath(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl OrchestratorError {
    /// The stable taxonomy tag (§7), used as the `error` field shape on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::InvalidArgument(_) => "invalid_argument",
            OrchestratorError::CliMissing(_) => "cli_missing",
            OrchestratorError::ResourceExhausted(_) => "resource_exhausted",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::DangerousPath(_) => "dangerous_path",
            OrchestratorError::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(
            OrchestratorError::NotFound("x".into()).kind(),
            "not_found"
        );
        assert_eq!(
            OrchestratorError::DangerousPath("/".into()).kind(),
            "dangerous_path"
        );
    }
}
