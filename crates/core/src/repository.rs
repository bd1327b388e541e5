//! Repository trait: the persistence collaborator.
//!
//! The orchestration core never embeds storage logic beyond these
//! operations. Implementations must give read-your-writes consistency to a
//! single engine and isolate sessions from one another.
//!
//! Implementations: SQLite, in-memory (for testing).

use async_trait::async_trait;
use crate::agent::{Agent, AgentUpdate, NewAgent};
use crate::capability::{Capability, CapabilityProposal, NewCapability, ProposalStatus};
use crate::checkpoint::SummaryCheckpoint;
use crate::error::StoreError;
use crate::message::{Message, NewMessage};
use crate::session::{NewSession, Session, SessionSettings, SessionStatus, TurnCommit};
use crate::template::{AgentTemplate, NewAgentTemplate};

type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait Repository: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    // ── Sessions ──────────────────────────────────────────────────────────

    async fn create_session(&self, new: NewSession) -> Result<Session>;

    async fn get_session(&self, id: &str) -> Result<Option<Session>>;

    async fn list_sessions(&self) -> Result<Vec<Session>>;

    /// Change configuration. Rejected with `SessionBusy` while leased.
    async fn update_session_settings(&self, id: &str, settings: SessionSettings) -> Result<Session>;

    /// Append the turn's reply, advance `current_turn_index` by exactly one
    /// and set `status`, all or nothing.
    ///
    /// Fails with `Conflict` unless the stored index equals
    /// `commit.expected_index`, so the counter can never skip or rewind; a
    /// failed commit leaves no reply behind.
    async fn commit_turn(&self, id: &str, commit: TurnCommit) -> Result<(Session, Message)>;

    async fn set_session_status(&self, id: &str, status: SessionStatus) -> Result<Session>;

    /// Take the run lease. Returns `false` if another run already holds it.
    async fn acquire_run_lease(&self, id: &str) -> Result<bool>;

    async fn release_run_lease(&self, id: &str) -> Result<()>;

    async fn set_pending_approval(&self, id: &str, proposal_id: Option<&str>) -> Result<()>;

    // ── Agents ────────────────────────────────────────────────────────────

    /// Rejected with `SessionBusy` while the session is leased.
    async fn create_agent(&self, session_id: &str, new: NewAgent) -> Result<Agent>;

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>>;

    /// Agents of a session ordered by `order_index`.
    async fn list_agents(&self, session_id: &str) -> Result<Vec<Agent>>;

    /// Rejected with `SessionBusy` while the owning session is leased.
    async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<Agent>;

    /// Attach a capability to an agent.
    ///
    /// Allowed under the run lease: the registration gate uses it mid-turn,
    /// and the engine reads tool sets at the start of each turn.
    async fn grant_capability(&self, agent_id: &str, capability: &str) -> Result<()>;

    // ── Messages ──────────────────────────────────────────────────────────

    /// Append a message, assigning id, sequence number and timestamp.
    async fn append_message(&self, new: NewMessage) -> Result<Message>;

    /// Full history in transcript order.
    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>>;

    /// The most recent `limit` messages, in transcript order.
    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>>;

    // ── Summary checkpoints ───────────────────────────────────────────────

    /// Persist a checkpoint. Fails with `Conflict` if it overlaps an existing one.
    async fn create_checkpoint(&self, checkpoint: SummaryCheckpoint) -> Result<()>;

    /// Checkpoints of a session in chronological order of their ranges.
    async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<SummaryCheckpoint>>;

    // ── Capabilities ──────────────────────────────────────────────────────

    /// Fails with `Conflict` if the name is taken.
    async fn create_capability(&self, new: NewCapability) -> Result<Capability>;

    async fn get_capability(&self, name: &str) -> Result<Option<Capability>>;

    async fn list_capabilities(&self) -> Result<Vec<Capability>>;

    /// Fails with `BuiltinProtected` for built-ins. Returns whether a row was removed.
    async fn delete_capability(&self, name: &str) -> Result<bool>;

    // ── Capability proposals ──────────────────────────────────────────────

    async fn create_proposal(&self, proposal: CapabilityProposal) -> Result<()>;

    async fn get_proposal(&self, id: &str) -> Result<Option<CapabilityProposal>>;

    async fn list_proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<CapabilityProposal>>;

    /// Move a pending proposal to `status`. Returns `false` if it was already decided.
    async fn decide_proposal(&self, id: &str, status: ProposalStatus) -> Result<bool>;

    // ── Agent templates ───────────────────────────────────────────────────

    /// Create or replace the template with this name. Fails with `Invalid`
    /// for an empty name, model or prompt.
    async fn upsert_template(&self, new: NewAgentTemplate) -> Result<AgentTemplate>;

    async fn get_template(&self, name: &str) -> Result<Option<AgentTemplate>>;

    /// All templates ordered by name.
    async fn list_templates(&self) -> Result<Vec<AgentTemplate>>;

    /// Returns whether a template was removed.
    async fn delete_template(&self, name: &str) -> Result<bool>;
}
