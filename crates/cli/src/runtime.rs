//! Wiring shared by the commands: config, store, built-ins and the gate.

use parley_config::AppConfig;
use parley_core::approval::Approver;
use parley_core::error::StoreError;
use parley_core::event::EventBus;
use parley_core::repository::Repository;
use parley_core::session::Session;
use parley_core::tool::Tool;
use parley_store::SqliteStore;
use parley_tools::{CapabilityCatalog, HttpClientPool, ProposeCapabilityTool, RegistrationGate, SandboxConfig};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub struct Runtime {
    pub config: AppConfig,
    pub repo: Arc<dyn Repository>,
    pub events: EventBus,
    pub http_pool: Arc<HttpClientPool>,
    builtins: Vec<Arc<dyn Tool>>,
}

impl Runtime {
    /// Load config, open the database and seed built-in capabilities.
    pub async fn open(config_path: Option<&Path>) -> Result<Self, Box<dyn std::error::Error>> {
        let config = match config_path {
            Some(path) => AppConfig::load_with_env(path)?,
            None => AppConfig::load()?,
        };
        let db_path = config.database.path();
        let store = SqliteStore::open(&db_path.to_string_lossy())
            .await
            .map_err(|e| format!("Failed to open database at {}: {e}", db_path.display()))?;
        Ok(Self::with_repo(config, Arc::new(store)).await?)
    }

    pub async fn with_repo(config: AppConfig, repo: Arc<dyn Repository>) -> Result<Self, StoreError> {
        let (builtins, http_pool) = parley_tools::builtin_tools(&config.tools);
        let rt = Self {
            config,
            repo,
            events: EventBus::default(),
            http_pool,
            builtins,
        };
        let added = rt.catalog(None).seed().await?;
        debug!(added, "Built-in capabilities checked");
        Ok(rt)
    }

    /// The registration gate, deciding through `approver`.
    pub fn gate(&self, approver: Arc<dyn Approver>) -> Arc<RegistrationGate> {
        Arc::new(
            RegistrationGate::new(self.repo.clone(), approver, self.events.clone())
                .with_interpreters(self.config.tools.interpreters.clone()),
        )
    }

    /// The capability catalog; with a gate, every speaker may propose tools.
    pub fn catalog(&self, gate: Option<Arc<RegistrationGate>>) -> CapabilityCatalog {
        let catalog = CapabilityCatalog::new(self.repo.clone(), SandboxConfig::from_tools_config(&self.config.tools))
            .with_builtins(self.builtins.iter().cloned());
        match gate {
            Some(gate) => catalog.with_gate(Arc::new(ProposeCapabilityTool::new(gate))),
            None => catalog,
        }
    }

    /// Find a session by id, or by name when the name is unique.
    pub async fn find_session(&self, key: &str) -> Result<Session, Box<dyn std::error::Error>> {
        if let Some(session) = self.repo.get_session(key).await? {
            return Ok(session);
        }
        let mut matches: Vec<Session> = self
            .repo
            .list_sessions()
            .await?
            .into_iter()
            .filter(|s| s.name.eq_ignore_ascii_case(key))
            .collect();
        match matches.len() {
            0 => Err(format!("No session with id or name '{key}'").into()),
            1 => Ok(matches.remove(0)),
            n => Err(format!("{n} sessions are named '{key}'; use the id instead").into()),
        }
    }
}
