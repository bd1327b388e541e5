//! Resolves stored capability records into executable tools.
//!
//! Built-in records point at native implementations registered here; every
//! other record runs through the script sandbox. The registration gate is
//! offered to every speaker regardless of its grants.

use parley_core::agent::Agent;
use parley_core::capability::{Capability, NewCapability};
use parley_core::error::StoreError;
use parley_core::repository::Repository;
use parley_core::tool::{Tool, ToolRegistry};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use crate::sandbox::{SandboxConfig, ScriptTool};

pub struct CapabilityCatalog {
    repo: Arc<dyn Repository>,
    builtins: HashMap<String, Arc<dyn Tool>>,
    sandbox: Arc<SandboxConfig>,
    gate: Option<Arc<dyn Tool>>,
}

impl CapabilityCatalog {
    pub fn new(repo: Arc<dyn Repository>, sandbox: SandboxConfig) -> Self {
        Self {
            repo,
            builtins: HashMap::new(),
            sandbox: Arc::new(sandbox),
            gate: None,
        }
    }

    pub fn with_builtins(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        for tool in tools {
            self.builtins.insert(tool.name().to_string(), tool);
        }
        self
    }

    /// The tool every speaker gets for proposing new capabilities.
    pub fn with_gate(mut self, gate: Arc<dyn Tool>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn builtin_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.builtins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Store a record for every native built-in that does not have one yet.
    ///
    /// Safe to run at every start; returns how many records were added.
    pub async fn seed(&self) -> Result<usize, StoreError> {
        let mut added = 0;
        for name in self.builtin_names() {
            let Some(tool) = self.builtins.get(name) else { continue };
            match self.repo.get_capability(name).await? {
                Some(existing) if existing.builtin => {}
                Some(_) => {
                    warn!(capability = name, "A user capability shadows a built-in name; leaving it in place");
                }
                None => match self.repo.create_capability(NewCapability::builtin(tool.to_definition())).await {
                    Ok(_) => added += 1,
                    Err(StoreError::Conflict { .. }) => {}
                    Err(e) => return Err(e),
                },
            }
        }
        if added > 0 {
            info!(added, "Seeded built-in capabilities");
        }
        Ok(added)
    }

    /// The executable form of a stored record.
    pub fn resolve(&self, capability: &Capability) -> Option<Arc<dyn Tool>> {
        if capability.builtin {
            let tool = self.builtins.get(&capability.name).cloned();
            if tool.is_none() {
                warn!(capability = %capability.name, "Built-in record has no native implementation");
            }
            return tool;
        }
        Some(Arc::new(ScriptTool::new(capability.clone(), self.sandbox.clone())))
    }

    /// The tools `agent` may call this turn: its granted capabilities that
    /// still exist, plus the registration gate.
    pub async fn tool_set_for(&self, agent: &Agent) -> Result<ToolRegistry, StoreError> {
        let mut registry = ToolRegistry::new();
        for name in &agent.capabilities {
            match self.repo.get_capability(name).await? {
                Some(capability) => {
                    if let Some(tool) = self.resolve(&capability) {
                        registry.register(tool);
                    }
                }
                None => debug!(agent = %agent.name, capability = %name, "Granted capability no longer exists"),
            }
        }
        if let Some(gate) = &self.gate {
            registry.register(gate.clone());
        }
        Ok(registry)
    }
}
