//! Engine error types.

use parley_core::error::{ProviderError, StoreError};
use thiserror::Error;

/// Why a single turn did not complete.
#[derive(Debug, Error)]
pub enum TurnError {
    #[error("turn cancelled")]
    Cancelled,

    #[error("No agent available to speak")]
    NoSpeaker,

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("model call failed for {agent_name}: {source}")]
    Model {
        agent_id: String,
        agent_name: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TurnError {
    /// The agent the failure belongs to, when there is one.
    pub fn agent_id(&self) -> Option<&str> {
        match self {
            Self::Model { agent_id, .. } => Some(agent_id),
            _ => None,
        }
    }
}

/// Why a run could not start or finish its bookkeeping.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {0} is already running")]
    SessionBusy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<EngineError> for parley_core::Error {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::Store(e) => Self::Store(e),
            other => Self::Internal(other.to_string()),
        }
    }
}
