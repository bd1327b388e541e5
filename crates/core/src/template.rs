//! Agent templates: saved presets for adding agents to any session.
//!
//! Templates are keyed by name. Saving under an existing name replaces the
//! preset but keeps its id and creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::agent::NewAgent;
use crate::error::StoreError;

pub const MAX_TEMPLATE_NAME_CHARS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentTemplate {
    pub id: String,
    pub name: String,
    pub model: String,
    pub system_prompt: String,
    /// Capability names granted to agents made from this template.
    #[serde(default)]
    pub tool_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentTemplate {
    /// An agent built from this preset. `name` overrides the template name.
    pub fn to_new_agent(&self, name: Option<&str>) -> NewAgent {
        NewAgent::new(name.unwrap_or(&self.name), &self.model, &self.system_prompt)
            .with_capabilities(self.tool_ids.iter().cloned())
    }
}

/// A template to save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAgentTemplate {
    pub name: String,
    pub model: String,
    pub system_prompt: String,
    #[serde(default)]
    pub tool_ids: Vec<String>,
}

impl NewAgentTemplate {
    pub fn new(name: impl Into<String>, model: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            system_prompt: system_prompt.into(),
            tool_ids: Vec::new(),
        }
    }

    pub fn with_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tool_ids = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        let name = self.name.trim();
        if name.is_empty() || name.chars().count() > MAX_TEMPLATE_NAME_CHARS {
            return Err(StoreError::Invalid(format!(
                "template name must be 1 to {MAX_TEMPLATE_NAME_CHARS} characters"
            )));
        }
        if self.model.trim().is_empty() {
            return Err(StoreError::Invalid("template model must not be empty".into()));
        }
        if self.system_prompt.trim().is_empty() {
            return Err(StoreError::Invalid("template system prompt must not be empty".into()));
        }
        Ok(())
    }

    /// Apply onto `existing` (same name) or create a fresh template.
    pub fn into_template(self, existing: Option<&AgentTemplate>) -> AgentTemplate {
        let now = Utc::now();
        let mut tool_ids = self.tool_ids;
        tool_ids.sort();
        tool_ids.dedup();
        AgentTemplate {
            id: existing.map_or_else(|| Uuid::new_v4().to_string(), |t| t.id.clone()),
            name: self.name.trim().to_string(),
            model: self.model,
            system_prompt: self.system_prompt,
            tool_ids,
            created_at: existing.map_or(now, |t| t.created_at),
            updated_at: now,
        }
    }
}
