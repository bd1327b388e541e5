//! Sleep tool: pauses the speaker, bounded and cancellable.

use async_trait::async_trait;
use parley_core::error::ToolError;
use parley_core::tool::{Tool, ToolContext};
use serde_json::{Value, json};
use std::time::Duration;

pub const MAX_SLEEP_SECS: f64 = 300.0;

/// Headroom over the longest sleep before the executor gives up.
const DEADLINE_SLACK: Duration = Duration::from_secs(10);

#[derive(Debug, Default)]
pub struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        "sleep"
    }

    fn description(&self) -> &str {
        "Pause execution for a specified number of seconds. Useful for rate-limit cooldowns or pacing between actions. Maximum 300 seconds (5 minutes)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "seconds": {
                    "type": "number",
                    "description": "Number of seconds to sleep (max 300)"
                }
            },
            "required": ["seconds"]
        })
    }

    fn deadline(&self, default: Duration) -> Option<Duration> {
        Some(default.max(Duration::from_secs_f64(MAX_SLEEP_SECS) + DEADLINE_SLACK))
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let requested = params["seconds"]
            .as_f64()
            .ok_or_else(|| ToolError::InvalidArguments("'seconds' must be a number".into()))?;
        let seconds = if requested.is_nan() { 0.0 } else { requested.clamp(0.0, MAX_SLEEP_SECS) };

        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ToolError::Cancelled("sleep".into())),
            _ = tokio::time::sleep(Duration::from_secs_f64(seconds)) => Ok(json!({ "slept": seconds })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn clamps_to_bounds() {
        let ctx = ToolContext::new("s", "a", "Alice");
        let out = SleepTool.execute(json!({"seconds": 9999}), &ctx).await.unwrap();
        assert_eq!(out, json!({"slept": 300.0}));

        let out = SleepTool.execute(json!({"seconds": -4}), &ctx).await.unwrap();
        assert_eq!(out, json!({"slept": 0.0}));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts() {
        let ctx = ToolContext::new("s", "a", "Alice");
        let cancel = ctx.cancel.clone();
        let handle = tokio::spawn(async move { SleepTool.execute(json!({"seconds": 200}), &ctx).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        assert!(matches!(handle.await.unwrap(), Err(ToolError::Cancelled(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn long_sleep_survives_executor_default() {
        use crate::ToolExecutor;
        use parley_core::tool::ToolRegistry;
        use std::sync::Arc;

        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SleepTool));
        let ctx = ToolContext::new("s", "a", "Alice");

        let outcome = ToolExecutor::new(Duration::from_secs(60))
            .execute(&registry, "sleep", json!({"seconds": 120}), &ctx)
            .await
            .unwrap();
        assert!(outcome.success, "{}", outcome.result);
        assert_eq!(outcome.result, json!({"slept": 120.0}));
    }

    #[tokio::test]
    async fn rejects_non_numbers() {
        let ctx = ToolContext::new("s", "a", "Alice");
        assert!(SleepTool.execute(json!({"seconds": "ten"}), &ctx).await.is_err());
    }
}
