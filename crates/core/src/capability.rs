//! Capability records and proposals.
//!
//! A capability is the stored form of a tool: name, description, parameter
//! schema and code. Built-ins are seeded at bootstrap and protected from
//! deletion; everything else enters through an approved proposal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::error::StoreError;
use crate::provider::ToolDefinition;

/// A stored capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub id: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,

    /// Source code for user capabilities; a `builtin:<name>` marker for built-ins.
    pub code: String,

    /// Interpreter for user capabilities (e.g. "sh", "python3").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,

    pub builtin: bool,
    pub created_at: DateTime<Utc>,
}

impl Capability {
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
        }
    }
}

/// Parameters for storing a capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCapability {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub code: String,
    #[serde(default)]
    pub interpreter: Option<String>,
    #[serde(default)]
    pub builtin: bool,
}

impl NewCapability {
    /// Describe a built-in from its tool definition.
    pub fn builtin(definition: ToolDefinition) -> Self {
        Self {
            code: format!("builtin:{}", definition.name),
            name: definition.name,
            description: definition.description,
            parameters: definition.parameters,
            interpreter: None,
            builtin: true,
        }
    }

    pub fn into_capability(self) -> Capability {
        Capability {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            description: self.description,
            parameters: self.parameters,
            code: self.code,
            interpreter: self.interpreter,
            builtin: self.builtin,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(StoreError::Invalid(format!("unknown proposal status '{other}'"))),
        }
    }
}

/// A human decision on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approve,
    Reject,
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }

    pub fn status(&self) -> ProposalStatus {
        match self {
            Self::Approve => ProposalStatus::Approved,
            Self::Reject => ProposalStatus::Rejected,
        }
    }
}

/// A capability an agent asked to add. Persisted so that a decision can be
/// applied even after the process that raised it has gone away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityProposal {
    pub id: String,
    pub session_id: String,
    pub agent_id: String,
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interpreter: Option<String>,
    pub status: ProposalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decided_at: Option<DateTime<Utc>>,
}

impl CapabilityProposal {
    #[allow(clippy::too_many_arguments)]
    pub fn pending(
        session_id: &str,
        agent_id: &str,
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
        code: impl Into<String>,
        interpreter: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            agent_id: agent_id.to_string(),
            name: name.into(),
            description: description.into(),
            parameters,
            code: code.into(),
            interpreter,
            status: ProposalStatus::Pending,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ProposalStatus::Pending
    }

    /// The capability this proposal installs when approved.
    pub fn to_new_capability(&self) -> NewCapability {
        NewCapability {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone(),
            code: self.code.clone(),
            interpreter: self.interpreter.clone(),
            builtin: false,
        }
    }
}
