//! Error types for the Parley domain.
//!
//! Each collaborator boundary (endpoint, repository, capability, approver)
//! has its own enum; [`Error`] folds them together for callers that do not
//! care which one failed.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failures talking to a completion endpoint.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Repository failures. `Conflict` and `SessionBusy` are expected outcomes
/// callers branch on; the rest are faults.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} already exists: {key}")]
    Conflict { entity: &'static str, key: String },

    #[error("Session {0} is held by a running conversation")]
    SessionBusy(String),

    #[error("Built-in capability cannot be removed: {0}")]
    BuiltinProtected(String),

    #[error("Invalid value: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Tool {tool_name} failed: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Tool cancelled: {0}")]
    Cancelled(String),

    #[error("Sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Error)]
pub enum ApprovalError {
    #[error("Approval channel closed for proposal {0}")]
    ChannelClosed(String),

    #[error("Proposal {0} is already being awaited")]
    AlreadyPending(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::Timeout {
            tool_name: "http_request".into(),
            timeout_secs: 60,
        });
        assert!(err.to_string().contains("http_request"));
        assert!(err.to_string().contains("60s"));
    }

    #[test]
    fn execution_failure_reads_plainly() {
        let err = ToolError::ExecutionFailed {
            tool_name: "shout".into(),
            reason: "exit status 1".into(),
        };
        assert_eq!(err.to_string(), "Tool shout failed: exit status 1");
    }

    #[test]
    fn bounded_errors_fold_into_top_level() {
        let err: Error = StoreError::SessionBusy("s1".into()).into();
        assert!(matches!(err, Error::Store(StoreError::SessionBusy(_))));
        let err: Error = ApprovalError::AlreadyPending("p1".into()).into();
        assert!(err.to_string().contains("p1"));
    }

    #[test]
    fn store_not_found_names_entity() {
        let err = StoreError::not_found("session", "abc");
        assert_eq!(err.to_string(), "session not found: abc");
    }
}
