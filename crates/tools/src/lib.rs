//! Capability execution for Parley.
//!
//! - [`executor`] runs one tool call under a deadline and the run's
//!   cancellation token, turning every failure into data for the model.
//! - [`catalog`] resolves stored capability records into executable tools.
//! - [`gate`] lets agents propose new capabilities for human approval.
//! - [`sandbox`] runs user capabilities as interpreter subprocesses.
//! - The remaining modules are the built-in capabilities seeded at bootstrap.

pub mod broker;
pub mod calculator;
pub mod catalog;
pub mod datetime;
pub mod executor;
pub mod gate;
pub mod http_pool;
pub mod http_request;
pub mod sandbox;
pub mod scratchpad;
pub mod sleep;
pub mod take_rest;

pub use broker::ApprovalBroker;
pub use catalog::CapabilityCatalog;
pub use executor::{ToolExecutor, ToolOutcome};
pub use gate::{PROPOSE_CAPABILITY, ProposalRequest, ProposeCapabilityTool, RegistrationGate, SettleOutcome};
pub use http_pool::HttpClientPool;
pub use sandbox::{SandboxConfig, ScriptTool};

use parley_config::ToolsConfig;
use parley_core::tool::Tool;
use std::sync::Arc;

/// All built-in capabilities, configured from `config`.
///
/// The HTTP client pool is returned separately so the caller can run its
/// idle-eviction timer.
pub fn builtin_tools(config: &ToolsConfig) -> (Vec<Arc<dyn Tool>>, Arc<HttpClientPool>) {
    let pool = Arc::new(HttpClientPool::new(config.session_idle()));
    let pad = Arc::new(scratchpad::Scratchpad::new(config.scratchpad_path()));

    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(calculator::CalculatorTool),
        Arc::new(datetime::DateTimeTool),
        Arc::new(sleep::SleepTool),
        Arc::new(take_rest::TakeRestTool),
        Arc::new(scratchpad::ReadScratchpadTool::new(pad.clone())),
        Arc::new(scratchpad::WriteScratchpadTool::new(pad)),
        Arc::new(http_request::HttpRequestTool::new(pool.clone())),
    ];
    (tools, pool)
}

/// Truncate a payload for logging, noting the original length.
pub fn truncate_payload(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{head}... ({total} chars)")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_set_has_unique_names() {
        let (tools, _pool) = builtin_tools(&ToolsConfig::default());
        let mut names: Vec<&str> = tools.iter().map(|t| t.name()).collect();
        names.sort_unstable();
        let before = names.len();
        names.dedup();
        assert_eq!(before, names.len());
        assert!(names.contains(&"calculator"));
        assert!(names.contains(&"http_request"));
        assert!(!names.contains(&PROPOSE_CAPABILITY));
    }

    #[test]
    fn truncation_counts_chars() {
        assert_eq!(truncate_payload("short", 10), "short");
        let long = "é".repeat(12);
        assert_eq!(truncate_payload(&long, 10), format!("{}... (12 chars)", "é".repeat(10)));
    }
}
