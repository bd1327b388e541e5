//! Tool execution with a deadline and cancellation.
//!
//! The executor never fails a turn on behalf of a tool: unknown names,
//! tool errors and timeouts all come back as `{"error": ...}` results the
//! model can read. Only cancellation of the run propagates as an error.

use parley_core::error::ToolError;
use parley_core::tool::{ToolContext, ToolRegistry};
use serde_json::{Value, json};
use std::time::{Duration, Instant};
use tracing::{info, warn};
use crate::truncate_payload;

const LOG_PAYLOAD_CHARS: usize = 1000;

/// The result of one tool invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutcome {
    pub result: Value,
    pub success: bool,
    pub duration_ms: u64,
}

impl ToolOutcome {
    fn failed(message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            result: json!({ "error": message.into() }),
            success: false,
            duration_ms,
        }
    }
}

/// Runs tool calls from a speaker's registry.
#[derive(Debug, Clone)]
pub struct ToolExecutor {
    timeout: Duration,
}

impl Default for ToolExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl ToolExecutor {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute `name` with `params`.
    ///
    /// Returns `Err(ToolError::Cancelled)` only when the run's cancellation
    /// token fires before the tool finishes.
    pub async fn execute(
        &self,
        registry: &ToolRegistry,
        name: &str,
        params: Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutcome, ToolError> {
        let Some(tool) = registry.get(name) else {
            warn!(session_id = %ctx.session_id, agent = %ctx.agent_name, tool = name, "Unknown tool requested");
            return Ok(ToolOutcome::failed(format!("Tool \"{name}\" not found"), 0));
        };

        if ctx.cancel.is_cancelled() {
            return Err(ToolError::Cancelled(name.to_string()));
        }

        info!(
            session_id = %ctx.session_id,
            agent = %ctx.agent_name,
            tool = name,
            args = %truncate_payload(&params.to_string(), LOG_PAYLOAD_CHARS),
            "Executing tool"
        );

        let deadline = tool.deadline(self.timeout);
        let start = Instant::now();
        let run = async {
            match deadline {
                Some(limit) => tokio::time::timeout(limit, tool.execute(params, ctx)).await,
                None => Ok(tool.execute(params, ctx).await),
            }
        };
        let result = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(ToolError::Cancelled(name.to_string())),
            r = run => r,
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        let outcome = match result {
            Ok(Ok(value)) => ToolOutcome {
                result: value,
                success: true,
                duration_ms,
            },
            Ok(Err(ToolError::Cancelled(_))) => return Err(ToolError::Cancelled(name.to_string())),
            Ok(Err(e)) => ToolOutcome::failed(error_message(&e), duration_ms),
            Err(_) => ToolOutcome::failed(
                ToolError::Timeout {
                    tool_name: name.to_string(),
                    timeout_secs: deadline.unwrap_or(self.timeout).as_secs(),
                }
                .to_string(),
                duration_ms,
            ),
        };

        if outcome.success {
            info!(
                session_id = %ctx.session_id,
                tool = name,
                duration_ms,
                result = %truncate_payload(&outcome.result.to_string(), LOG_PAYLOAD_CHARS),
                "Tool succeeded"
            );
        } else {
            warn!(
                session_id = %ctx.session_id,
                tool = name,
                duration_ms,
                error = %truncate_payload(&outcome.result.to_string(), LOG_PAYLOAD_CHARS),
                "Tool failed"
            );
        }

        Ok(outcome)
    }
}

/// The message shown to the model for a tool failure.
fn error_message(error: &ToolError) -> String {
    match error {
        ToolError::ExecutionFailed { reason, .. } => reason.clone(),
        ToolError::InvalidArguments(reason) => format!("Invalid arguments: {reason}"),
        other => other.to_string(),
    }
}
