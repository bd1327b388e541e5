//! Runs user capabilities as interpreter subprocesses.
//!
//! The code is passed to an allowlisted interpreter, the call's parameters
//! arrive as JSON on stdin, and stdout is the result (parsed as JSON when
//! it is JSON, otherwise returned as a string). The child gets a scrubbed
//! environment and is killed when the call is dropped, times out or is
//! cancelled.

use async_trait::async_trait;
use parley_config::ToolsConfig;
use parley_core::capability::Capability;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext};
use serde_json::Value;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const DEFAULT_INTERPRETER: &str = "sh";
const MAX_STDERR_CHARS: usize = 2000;

/// What a script may use.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub interpreters: Vec<String>,
    pub env_passthrough: Vec<String>,
}

impl SandboxConfig {
    pub fn from_tools_config(config: &ToolsConfig) -> Self {
        Self {
            interpreters: config.interpreters.clone(),
            env_passthrough: config.env_passthrough.clone(),
        }
    }

    pub fn allows(&self, interpreter: &str) -> bool {
        self.interpreters.iter().any(|i| i == interpreter)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self::from_tools_config(&ToolsConfig::default())
    }
}

/// The flag that makes `interpreter` run inline code.
fn inline_flag(interpreter: &str) -> &'static str {
    match interpreter {
        "node" | "deno" => "-e",
        _ => "-c",
    }
}

/// A stored capability executed as a script.
pub struct ScriptTool {
    capability: Capability,
    config: Arc<SandboxConfig>,
}

impl ScriptTool {
    pub fn new(capability: Capability, config: Arc<SandboxConfig>) -> Self {
        Self { capability, config }
    }

    fn interpreter(&self) -> &str {
        self.capability.interpreter.as_deref().unwrap_or(DEFAULT_INTERPRETER)
    }

    fn failed(&self, reason: impl Into<String>) -> ToolError {
        ToolError::ExecutionFailed {
            tool_name: self.capability.name.clone(),
            reason: reason.into(),
        }
    }

    fn command(&self, ctx: &ToolContext) -> Command {
        let interpreter = self.interpreter();
        let mut cmd = Command::new(interpreter);
        cmd.arg(inline_flag(interpreter))
            .arg(&self.capability.code)
            .env_clear()
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        for key in &self.config.env_passthrough {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.env("PARLEY_SESSION_ID", &ctx.session_id)
            .env("PARLEY_AGENT_ID", &ctx.agent_id)
            .env("PARLEY_AGENT_NAME", &ctx.agent_name)
            .env("PARLEY_TOOL_NAME", &self.capability.name);
        cmd
    }

    async fn run(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let mut child = self
            .command(ctx)
            .spawn()
            .map_err(|e| self.failed(format!("failed to start {}: {e}", self.interpreter())))?;

        if let Some(mut stdin) = child.stdin.take() {
            let input = params.to_string();
            // A script that never reads stdin closes the pipe early.
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                debug!(tool = %self.capability.name, error = %e, "Script did not read its input");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.failed(format!("failed to wait for script: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr: String = stderr.trim().chars().take(MAX_STDERR_CHARS).collect();
            let code = output.status.code().map_or_else(|| "signal".to_string(), |c| c.to_string());
            warn!(tool = %self.capability.name, exit_code = %code, "Script failed");
            return Err(self.failed(if stderr.is_empty() {
                format!("script exited with status {code}")
            } else {
                format!("script exited with status {code}: {stderr}")
            }));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(stdout).unwrap_or_else(|_| Value::String(stdout.to_string())))
    }
}

#[async_trait]
impl Tool for ScriptTool {
    fn name(&self) -> &str {
        &self.capability.name
    }

    fn description(&self) -> &str {
        &self.capability.description
    }

    fn parameters_schema(&self) -> Value {
        self.capability.parameters.clone()
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let interpreter = self.interpreter();
        if !self.config.allows(interpreter) {
            return Err(ToolError::SandboxViolation(format!(
                "interpreter '{interpreter}' is not allowed for {}",
                self.capability.name
            )));
        }

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled(self.capability.name.clone())),
            result = self.run(params, ctx) => result,
        }
    }
}
