//! Capability registration gate.
//!
//! An agent proposes a new capability; the proposal is persisted, the
//! session is marked as waiting, and the call suspends until an approver
//! decides. Decisions are applied by [`RegistrationGate::settle`], which is
//! idempotent so an operator can settle a proposal left pending by a run
//! that no longer exists.

use async_trait::async_trait;
use parley_core::approval::Approver;
use parley_core::capability::{ApprovalDecision, CapabilityProposal, ProposalStatus};
use parley_core::error::{StoreError, ToolError};
use parley_core::event::{ConversationEvent, EventBus};
use parley_core::message::NewMessage;
use parley_core::repository::Repository;
use parley_core::tool::{Tool, ToolContext};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Name of the always-available proposal capability.
pub const PROPOSE_CAPABILITY: &str = "propose_capability";

/// What applying a decision did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettleOutcome {
    Installed { name: String },
    Rejected { name: String },
    /// Approved, but the name was already taken.
    Refused { name: String },
    /// The proposal had been decided before this call.
    AlreadyDecided { name: String, status: ProposalStatus },
}

impl SettleOutcome {
    pub fn is_installed(&self) -> bool {
        matches!(self, Self::Installed { .. })
    }

    /// The result handed back to the proposing agent.
    pub fn to_result(&self) -> Value {
        let (success, message) = match self {
            Self::Installed { name } => (true, format!("Tool \"{name}\" has been created and is now available.")),
            Self::Rejected { name } => (false, format!("Tool \"{name}\" was rejected by the user.")),
            Self::Refused { name } => (false, format!("A tool named \"{name}\" already exists.")),
            Self::AlreadyDecided { name, status } => (
                *status == ProposalStatus::Approved,
                format!("Tool \"{name}\" was already {status}."),
            ),
        };
        json!({ "success": success, "message": message })
    }

    /// The note recorded in the transcript once a proposal is decided.
    pub fn system_note(&self) -> String {
        match self {
            Self::Installed { name } => format!("Capability \"{name}\" was approved and installed."),
            Self::Rejected { name } => format!("Capability \"{name}\" was rejected."),
            Self::Refused { name } => {
                format!("Capability \"{name}\" was approved but not installed: the name is taken.")
            }
            Self::AlreadyDecided { name, status } => format!("Capability \"{name}\" was already {status}."),
        }
    }
}

pub struct RegistrationGate {
    repo: Arc<dyn Repository>,
    approver: Arc<dyn Approver>,
    events: EventBus,
    interpreters: Vec<String>,
}

impl RegistrationGate {
    pub fn new(repo: Arc<dyn Repository>, approver: Arc<dyn Approver>, events: EventBus) -> Self {
        Self {
            repo,
            approver,
            events,
            interpreters: vec!["sh".into()],
        }
    }

    /// Interpreters a proposal may name.
    pub fn with_interpreters(mut self, interpreters: Vec<String>) -> Self {
        self.interpreters = interpreters;
        self
    }

    /// Raise a proposal and wait for its decision.
    pub async fn propose(&self, request: ProposalRequest, ctx: &ToolContext) -> Result<Value, ToolError> {
        let store_failed = |e: StoreError| ToolError::ExecutionFailed {
            tool_name: PROPOSE_CAPABILITY.into(),
            reason: e.to_string(),
        };

        if request.name == PROPOSE_CAPABILITY
            || self.repo.get_capability(&request.name).await.map_err(store_failed)?.is_some()
        {
            return Ok(SettleOutcome::Refused { name: request.name }.to_result());
        }
        if !self.interpreters.contains(&request.interpreter) {
            return Err(ToolError::InvalidArguments(format!(
                "interpreter '{}' is not available; use one of: {}",
                request.interpreter,
                self.interpreters.join(", ")
            )));
        }

        let proposal = CapabilityProposal::pending(
            &ctx.session_id,
            &ctx.agent_id,
            request.name,
            request.description,
            request.parameters,
            request.code,
            Some(request.interpreter),
        );
        self.repo.create_proposal(proposal.clone()).await.map_err(store_failed)?;
        self.repo
            .set_pending_approval(&ctx.session_id, Some(&proposal.id))
            .await
            .map_err(store_failed)?;

        info!(
            session_id = %ctx.session_id,
            agent = %ctx.agent_name,
            proposal_id = %proposal.id,
            tool = %proposal.name,
            "Capability proposed, awaiting approval"
        );
        self.events.publish(ConversationEvent::ApprovalRequired {
            session_id: ctx.session_id.clone(),
            agent_id: ctx.agent_id.clone(),
            proposal_id: proposal.id.clone(),
            tool_name: proposal.name.clone(),
            description: proposal.description.clone(),
            parameters: proposal.parameters.clone(),
            code: proposal.code.clone(),
        });

        // A cancelled or unanswered proposal stays pending for a later settle.
        let decision = tokio::select! {
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled(PROPOSE_CAPABILITY.into())),
            decision = self.approver.decide(&proposal) => decision.map_err(|e| ToolError::ExecutionFailed {
                tool_name: PROPOSE_CAPABILITY.into(),
                reason: format!("{e}; proposal {} remains pending", proposal.id),
            })?,
        };

        let outcome = self.settle(&proposal.id, decision).await.map_err(store_failed)?;
        if outcome.is_installed() {
            ctx.rest.request();
        }
        Ok(outcome.to_result())
    }

    /// Apply `decision` to a proposal. Idempotent.
    pub async fn settle(&self, proposal_id: &str, decision: ApprovalDecision) -> Result<SettleOutcome, StoreError> {
        let proposal = self
            .repo
            .get_proposal(proposal_id)
            .await?
            .ok_or_else(|| StoreError::not_found("proposal", proposal_id))?;
        let name = proposal.name.clone();

        if !proposal.is_pending() {
            return Ok(SettleOutcome::AlreadyDecided {
                name,
                status: proposal.status,
            });
        }

        let outcome = if !decision.is_approved() {
            if !self.repo.decide_proposal(proposal_id, ProposalStatus::Rejected).await? {
                return self.already_decided(proposal_id, name).await;
            }
            SettleOutcome::Rejected { name }
        } else {
            // Install first; the proposal only reads Approved once the
            // capability exists. Other store errors leave it pending.
            match self.repo.create_capability(proposal.to_new_capability()).await {
                Ok(_) => {
                    if !self.repo.decide_proposal(proposal_id, ProposalStatus::Approved).await? {
                        self.repo.delete_capability(&name).await?;
                        return self.already_decided(proposal_id, name).await;
                    }
                    self.repo.grant_capability(&proposal.agent_id, &name).await?;
                    SettleOutcome::Installed { name }
                }
                Err(StoreError::Conflict { .. }) => {
                    warn!(proposal_id, tool = %name, "Capability name taken, proposal refused");
                    if !self.repo.decide_proposal(proposal_id, ProposalStatus::Rejected).await? {
                        return self.already_decided(proposal_id, name).await;
                    }
                    SettleOutcome::Refused { name }
                }
                Err(e) => return Err(e),
            }
        };

        if let Some(session) = self.repo.get_session(&proposal.session_id).await?
            && session.pending_approval.as_deref() == Some(proposal_id)
        {
            self.repo.set_pending_approval(&proposal.session_id, None).await?;
        }

        info!(
            session_id = %proposal.session_id,
            proposal_id,
            outcome = ?outcome,
            "Proposal settled"
        );
        Ok(outcome)
    }

    /// Settle a proposal no turn is waiting on, recording the decision in
    /// the session transcript.
    pub async fn settle_detached(
        &self,
        proposal_id: &str,
        decision: ApprovalDecision,
    ) -> Result<SettleOutcome, StoreError> {
        let outcome = self.settle(proposal_id, decision).await?;
        if !matches!(outcome, SettleOutcome::AlreadyDecided { .. })
            && let Some(proposal) = self.repo.get_proposal(proposal_id).await?
        {
            self.repo
                .append_message(NewMessage::system(&proposal.session_id, outcome.system_note()))
                .await?;
        }
        Ok(outcome)
    }

    async fn already_decided(&self, proposal_id: &str, name: String) -> Result<SettleOutcome, StoreError> {
        let status = self
            .repo
            .get_proposal(proposal_id)
            .await?
            .map(|p| p.status)
            .unwrap_or(ProposalStatus::Rejected);
        Ok(SettleOutcome::AlreadyDecided { name, status })
    }
}

/// Validated arguments of a proposal.
#[derive(Debug, Clone, PartialEq)]
pub struct ProposalRequest {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    pub code: String,
    pub interpreter: String,
}

impl ProposalRequest {
    pub fn parse(params: &Value) -> Result<Self, ToolError> {
        let field = |key: &str| {
            params[key]
                .as_str()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .ok_or_else(|| ToolError::InvalidArguments(format!("missing '{key}'")))
        };

        let name = field("name")?;
        if !name.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
            || name.starts_with(|c: char| c.is_ascii_digit())
        {
            return Err(ToolError::InvalidArguments(format!(
                "tool name '{name}' must be snake_case (a-z, 0-9, _)"
            )));
        }

        let parameters = match &params["parameters"] {
            Value::Null => json!({ "type": "object", "properties": {} }),
            Value::Object(_) => params["parameters"].clone(),
            // Some models send the schema as a JSON string.
            Value::String(s) => serde_json::from_str::<Value>(s)
                .ok()
                .filter(Value::is_object)
                .ok_or_else(|| ToolError::InvalidArguments("'parameters' must be a JSON Schema object".into()))?,
            _ => return Err(ToolError::InvalidArguments("'parameters' must be a JSON Schema object".into())),
        };

        Ok(Self {
            name,
            description: field("description")?,
            parameters,
            code: field("code")?,
            interpreter: params["interpreter"].as_str().unwrap_or("sh").to_string(),
        })
    }
}

/// The `propose_capability` tool handed to every speaker.
pub struct ProposeCapabilityTool {
    gate: Arc<RegistrationGate>,
}

impl ProposeCapabilityTool {
    pub fn new(gate: Arc<RegistrationGate>) -> Self {
        Self { gate }
    }
}

#[async_trait]
impl Tool for ProposeCapabilityTool {
    fn name(&self) -> &str {
        PROPOSE_CAPABILITY
    }

    fn description(&self) -> &str {
        "Propose a new tool for yourself. A human reviews the code and decides; if approved, the tool is installed and the conversation pauses so it can be loaded. The script receives its parameters as JSON on stdin and should print its result (JSON preferred) to stdout."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "name": {
                    "type": "string",
                    "description": "Tool name in snake_case"
                },
                "description": {
                    "type": "string",
                    "description": "What the tool does, shown to agents"
                },
                "parameters": {
                    "type": "object",
                    "description": "JSON Schema for the tool's parameters"
                },
                "code": {
                    "type": "string",
                    "description": "Script source; reads JSON parameters from stdin, writes the result to stdout"
                },
                "interpreter": {
                    "type": "string",
                    "description": "Interpreter for the script",
                    "enum": self.gate.interpreters,
                    "default": "sh"
                }
            },
            "required": ["name", "description", "code"]
        })
    }

    /// A human may take as long as they need; only cancellation ends the wait.
    fn deadline(&self, _default: Duration) -> Option<Duration> {
        None
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let request = ProposalRequest::parse(&params)?;
        self.gate.propose(request, ctx).await
    }
}
