//! Domain errors for the tandem coordination server.

use thiserror::Error;

/// Domain-level errors that can occur in the tandem system.
///
/// The taxonomy matters more than the payloads: Validation and NotFound
/// are surfaced to the RPC caller without error-level logging, Conflict
/// logs at info, Storage logs at error, Spawn is counted against the
/// retry budget and never reaches a tool caller unless that caller
/// triggered the spawn.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("Task not found: {0}")]
    TaskNotFound(i64),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Plan not found: {0}")]
    PlanNotFound(i64),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Spawn failed for {instance}: {reason}")]
    SpawnFailed { instance: String, reason: String },
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// JSON-RPC error code used when this error is returned to a tool caller.
    pub fn rpc_code(&self) -> i64 {
        match self {
            Self::ValidationFailed(_) => -32602,
            Self::TaskNotFound(_) | Self::AgentNotFound(_) | Self::PlanNotFound(_) => -32001,
            Self::InvalidStateTransition { .. } | Self::Conflict(_) => -32002,
            Self::Storage(_) | Self::Serialization(_) | Self::SpawnFailed { .. } => -32603,
        }
    }

    /// Whether this error should be logged at error level when it occurs
    /// inside a mutation. Caller mistakes are not server faults.
    pub fn is_server_fault(&self) -> bool {
        matches!(
            self,
            Self::Storage(_) | Self::Serialization(_) | Self::SpawnFailed { .. }
        )
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_server_faults() {
        assert!(!DomainError::ValidationFailed("bad".into()).is_server_fault());
        assert!(!DomainError::TaskNotFound(7).is_server_fault());
        assert!(DomainError::Storage("disk full".into()).is_server_fault());
    }

    #[test]
    fn rpc_codes_distinguish_kinds() {
        assert_eq!(DomainError::ValidationFailed("x".into()).rpc_code(), -32602);
        assert_eq!(DomainError::TaskNotFound(1).rpc_code(), -32001);
        assert_eq!(
            DomainError::Conflict("completed task".into()).rpc_code(),
            -32002
        );
    }
}
