//! Lets a speaker end the current run cleanly after its turn.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext};
use serde_json::{Value, json};
use tracing::info;

pub struct TakeRestTool;

#[async_trait]
impl Tool for TakeRestTool {
    fn name(&self) -> &str {
        "take_rest"
    }

    fn description(&self) -> &str {
        "Pause the conversation after your current turn. Use when the discussion has reached a natural stopping point or needs human input. The session can be resumed later."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "reason": {
                    "type": "string",
                    "description": "Why the conversation should rest"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let reason = params["reason"].as_str().unwrap_or("");
        info!(session_id = %ctx.session_id, agent = %ctx.agent_name, reason, "Rest requested");
        ctx.rest.request();
        Ok(json!({
            "resting": true,
            "message": "The conversation will pause after this turn."
        }))
    }
}
