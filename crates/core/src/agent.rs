//! Agent: a named participant bound to a model and a capability set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Display colours assigned round-robin to new agents.
pub const AGENT_COLORS: [&str; 8] = [
    "#3B82F6", // blue
    "#EF4444", // red
    "#10B981", // green
    "#F59E0B", // amber
    "#8B5CF6", // violet
    "#EC4899", // pink
    "#06B6D4", // cyan
    "#F97316", // orange
];

/// A speaking participant in exactly one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub id: String,
    pub session_id: String,
    pub name: String,

    /// Completion-endpoint model identifier
    pub model: String,

    pub system_prompt: String,

    /// Position in fixed rotation
    pub order_index: i64,

    pub color: String,

    /// Names of the capabilities this agent may call. Order is irrelevant.
    #[serde(default)]
    pub capabilities: Vec<String>,

    pub created_at: DateTime<Utc>,
}

impl Agent {
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities.iter().any(|c| c == name)
    }
}

/// Parameters for adding an agent to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAgent {
    pub name: String,
    pub model: String,
    pub system_prompt: String,
    /// `None` appends the agent after the current last one.
    #[serde(default)]
    pub order_index: Option<i64>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl NewAgent {
    pub fn new(name: impl Into<String>, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            order_index: None,
            color: None,
            capabilities: Vec::new(),
        }
    }

    pub fn with_order(mut self, order_index: i64) -> Self {
        self.order_index = Some(order_index);
        self
    }

    pub fn with_capabilities<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = names.into_iter().map(Into::into).collect();
        self
    }

    /// Materialize into an `Agent`. `existing` is the number of agents
    /// already in the session, used for default ordering and colour.
    pub fn into_agent(self, session_id: &str, existing: usize) -> Agent {
        let mut capabilities = self.capabilities;
        capabilities.sort();
        capabilities.dedup();
        Agent {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            name: self.name,
            model: self.model,
            system_prompt: self.system_prompt,
            order_index: self.order_index.unwrap_or(existing as i64),
            color: self
                .color
                .unwrap_or_else(|| AGENT_COLORS[existing % AGENT_COLORS.len()].to_string()),
            capabilities,
            created_at: Utc::now(),
        }
    }
}

/// Editable agent fields. Rejected while the session is running.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentUpdate {
    pub name: Option<String>,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    pub order_index: Option<i64>,
    pub color: Option<String>,
    pub capabilities: Option<Vec<String>>,
}

impl AgentUpdate {
    pub fn apply_to(self, agent: &mut Agent) {
        if let Some(name) = self.name {
            agent.name = name;
        }
        if let Some(model) = self.model {
            agent.model = model;
        }
        if let Some(prompt) = self.system_prompt {
            agent.system_prompt = prompt;
        }
        if let Some(order) = self.order_index {
            agent.order_index = order;
        }
        if let Some(color) = self.color {
            agent.color = color;
        }
        if let Some(mut caps) = self.capabilities {
            caps.sort();
            caps.dedup();
            agent.capabilities = caps;
        }
    }
}
