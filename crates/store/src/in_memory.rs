//! In-memory repository: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use chrono::Utc;
use parley_core::agent::{Agent, AgentUpdate, NewAgent};
use parley_core::capability::{Capability, CapabilityProposal, NewCapability, ProposalStatus};
use parley_core::checkpoint::SummaryCheckpoint;
use parley_core::error::StoreError;
use parley_core::message::{Message, NewMessage};
use parley_core::repository::Repository;
use parley_core::session::{NewSession, Session, SessionSettings, SessionStatus, TurnCommit};
use parley_core::template::{AgentTemplate, NewAgentTemplate};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

type Result<T> = std::result::Result<T, StoreError>;

#[derive(Default)]
struct State {
    sessions: HashMap<String, Session>,
    agents: HashMap<String, Agent>,
    messages: HashMap<String, Vec<Message>>,
    checkpoints: HashMap<String, Vec<SummaryCheckpoint>>,
    capabilities: BTreeMap<String, Capability>,
    proposals: HashMap<String, CapabilityProposal>,
    templates: BTreeMap<String, AgentTemplate>,
    next_seq: i64,
}

impl State {
    fn session_mut(&mut self, id: &str) -> Result<&mut Session> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("session", id))
    }

    fn ensure_idle(&self, session_id: &str) -> Result<()> {
        match self.sessions.get(session_id) {
            None => Err(StoreError::not_found("session", session_id)),
            Some(s) if s.run_lease => Err(StoreError::SessionBusy(session_id.to_string())),
            Some(_) => Ok(()),
        }
    }

    fn agents_of(&self, session_id: &str) -> Vec<Agent> {
        let mut agents: Vec<Agent> = self
            .agents
            .values()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect();
        agents.sort_by(|a, b| a.order_index.cmp(&b.order_index).then(a.created_at.cmp(&b.created_at)));
        agents
    }

    fn name_taken(&self, session_id: &str, name: &str, except: Option<&str>) -> bool {
        self.agents.values().any(|a| {
            a.session_id == session_id
                && a.name.eq_ignore_ascii_case(name)
                && Some(a.id.as_str()) != except
        })
    }
}

/// An in-memory repository guarded by a single `RwLock`.
/// Cloning shares the underlying state.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn create_session(&self, new: NewSession) -> Result<Session> {
        new.validate()?;
        let session = new.into_session();
        self.state
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(session)
    }

    async fn get_session(&self, id: &str) -> Result<Option<Session>> {
        Ok(self.state.read().await.sessions.get(id).cloned())
    }

    async fn list_sessions(&self) -> Result<Vec<Session>> {
        let state = self.state.read().await;
        let mut sessions: Vec<Session> = state.sessions.values().cloned().collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    async fn update_session_settings(&self, id: &str, settings: SessionSettings) -> Result<Session> {
        let mut state = self.state.write().await;
        state.ensure_idle(id)?;
        let session = state.session_mut(id)?;
        let mut updated = session.clone();
        settings.apply_to(&mut updated)?;
        *session = updated.clone();
        Ok(updated)
    }

    async fn commit_turn(&self, id: &str, commit: TurnCommit) -> Result<(Session, Message)> {
        if commit.reply.session_id != id {
            return Err(StoreError::Invalid(format!("reply belongs to session {}", commit.reply.session_id)));
        }
        let mut state = self.state.write().await;
        let session = state.session_mut(id)?;
        if session.current_turn_index != commit.expected_index {
            return Err(StoreError::Conflict {
                entity: "turn",
                key: format!("{id}@{}", commit.expected_index),
            });
        }
        session.current_turn_index += 1;
        session.status = commit.status;
        session.updated_at = Utc::now();
        let session = session.clone();

        state.next_seq += 1;
        let message = commit.reply.into_message(Uuid::new_v4().to_string(), state.next_seq, Utc::now());
        state
            .messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok((session, message))
    }

    async fn set_session_status(&self, id: &str, status: SessionStatus) -> Result<Session> {
        let mut state = self.state.write().await;
        let session = state.session_mut(id)?;
        session.status = status;
        session.updated_at = Utc::now();
        Ok(session.clone())
    }

    async fn acquire_run_lease(&self, id: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        let session = state.session_mut(id)?;
        if session.run_lease {
            return Ok(false);
        }
        session.run_lease = true;
        Ok(true)
    }

    async fn release_run_lease(&self, id: &str) -> Result<()> {
        let mut state = self.state.write().await;
        state.session_mut(id)?.run_lease = false;
        Ok(())
    }

    async fn set_pending_approval(&self, id: &str, proposal_id: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        let session = state.session_mut(id)?;
        session.pending_approval = proposal_id.map(str::to_string);
        session.updated_at = Utc::now();
        Ok(())
    }

    async fn create_agent(&self, session_id: &str, new: NewAgent) -> Result<Agent> {
        let mut state = self.state.write().await;
        state.ensure_idle(session_id)?;
        if new.name.trim().is_empty() {
            return Err(StoreError::Invalid("agent name must not be empty".into()));
        }
        if state.name_taken(session_id, &new.name, None) {
            return Err(StoreError::Conflict {
                entity: "agent",
                key: new.name,
            });
        }
        let existing = state.agents_of(session_id).len();
        let agent = new.into_agent(session_id, existing);
        state.agents.insert(agent.id.clone(), agent.clone());
        Ok(agent)
    }

    async fn get_agent(&self, id: &str) -> Result<Option<Agent>> {
        Ok(self.state.read().await.agents.get(id).cloned())
    }

    async fn list_agents(&self, session_id: &str) -> Result<Vec<Agent>> {
        Ok(self.state.read().await.agents_of(session_id))
    }

    async fn update_agent(&self, id: &str, update: AgentUpdate) -> Result<Agent> {
        let mut state = self.state.write().await;
        let session_id = state
            .agents
            .get(id)
            .map(|a| a.session_id.clone())
            .ok_or_else(|| StoreError::not_found("agent", id))?;
        state.ensure_idle(&session_id)?;
        if let Some(name) = &update.name {
            if state.name_taken(&session_id, name, Some(id)) {
                return Err(StoreError::Conflict {
                    entity: "agent",
                    key: name.clone(),
                });
            }
        }
        let agent = state
            .agents
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("agent", id))?;
        update.apply_to(agent);
        Ok(agent.clone())
    }

    async fn grant_capability(&self, agent_id: &str, capability: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let agent = state
            .agents
            .get_mut(agent_id)
            .ok_or_else(|| StoreError::not_found("agent", agent_id))?;
        if !agent.has_capability(capability) {
            agent.capabilities.push(capability.to_string());
            agent.capabilities.sort();
        }
        Ok(())
    }

    async fn append_message(&self, new: NewMessage) -> Result<Message> {
        let mut state = self.state.write().await;
        if !state.sessions.contains_key(&new.session_id) {
            return Err(StoreError::not_found("session", new.session_id));
        }
        state.next_seq += 1;
        let seq = state.next_seq;
        let message = new.into_message(Uuid::new_v4().to_string(), seq, Utc::now());
        state
            .messages
            .entry(message.session_id.clone())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, session_id: &str) -> Result<Vec<Message>> {
        let state = self.state.read().await;
        let mut messages = state.messages.get(session_id).cloned().unwrap_or_default();
        parley_core::message::sort_chronologically(&mut messages);
        Ok(messages)
    }

    async fn recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let mut messages = self.list_messages(session_id).await?;
        let skip = messages.len().saturating_sub(limit);
        Ok(messages.split_off(skip))
    }

    async fn create_checkpoint(&self, checkpoint: SummaryCheckpoint) -> Result<()> {
        let mut state = self.state.write().await;
        let existing = state.checkpoints.entry(checkpoint.session_id.clone()).or_default();
        if existing.iter().any(|c| c.overlaps(&checkpoint)) {
            return Err(StoreError::Conflict {
                entity: "checkpoint",
                key: checkpoint.id,
            });
        }
        existing.push(checkpoint);
        Ok(())
    }

    async fn list_checkpoints(&self, session_id: &str) -> Result<Vec<SummaryCheckpoint>> {
        let state = self.state.read().await;
        let mut checkpoints = state.checkpoints.get(session_id).cloned().unwrap_or_default();
        checkpoints.sort_by_key(|c| c.start_key());
        Ok(checkpoints)
    }

    async fn create_capability(&self, new: NewCapability) -> Result<Capability> {
        let mut state = self.state.write().await;
        if state.capabilities.contains_key(&new.name) {
            return Err(StoreError::Conflict {
                entity: "capability",
                key: new.name,
            });
        }
        let capability = new.into_capability();
        state
            .capabilities
            .insert(capability.name.clone(), capability.clone());
        Ok(capability)
    }

    async fn get_capability(&self, name: &str) -> Result<Option<Capability>> {
        Ok(self.state.read().await.capabilities.get(name).cloned())
    }

    async fn list_capabilities(&self) -> Result<Vec<Capability>> {
        Ok(self.state.read().await.capabilities.values().cloned().collect())
    }

    async fn delete_capability(&self, name: &str) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.capabilities.get(name) {
            None => return Ok(false),
            Some(c) if c.builtin => return Err(StoreError::BuiltinProtected(name.to_string())),
            Some(_) => {}
        }
        state.capabilities.remove(name);
        for agent in state.agents.values_mut() {
            agent.capabilities.retain(|c| c != name);
        }
        Ok(true)
    }

    async fn create_proposal(&self, proposal: CapabilityProposal) -> Result<()> {
        let mut state = self.state.write().await;
        if state.proposals.contains_key(&proposal.id) {
            return Err(StoreError::Conflict {
                entity: "proposal",
                key: proposal.id,
            });
        }
        state.proposals.insert(proposal.id.clone(), proposal);
        Ok(())
    }

    async fn get_proposal(&self, id: &str) -> Result<Option<CapabilityProposal>> {
        Ok(self.state.read().await.proposals.get(id).cloned())
    }

    async fn list_proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<CapabilityProposal>> {
        let state = self.state.read().await;
        let mut proposals: Vec<CapabilityProposal> = state
            .proposals
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        proposals.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(proposals)
    }

    async fn decide_proposal(&self, id: &str, status: ProposalStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        let proposal = state
            .proposals
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found("proposal", id))?;
        if !proposal.is_pending() {
            return Ok(false);
        }
        proposal.status = status;
        proposal.decided_at = Some(Utc::now());
        Ok(true)
    }

    async fn upsert_template(&self, new: NewAgentTemplate) -> Result<AgentTemplate> {
        new.validate()?;
        let key = new.name.trim().to_string();
        let mut state = self.state.write().await;
        let template = new.into_template(state.templates.get(&key));
        state.templates.insert(template.name.clone(), template.clone());
        Ok(template)
    }

    async fn get_template(&self, name: &str) -> Result<Option<AgentTemplate>> {
        Ok(self.state.read().await.templates.get(name.trim()).cloned())
    }

    async fn list_templates(&self) -> Result<Vec<AgentTemplate>> {
        Ok(self.state.read().await.templates.values().cloned().collect())
    }

    async fn delete_template(&self, name: &str) -> Result<bool> {
        Ok(self.state.write().await.templates.remove(name.trim()).is_some())
    }
}
