//! The bounded tool-call loop for one turn.
//!
//! ```text
//! round 1..=max_rounds:  model(messages, tools)
//!                         ├─ text only      → done
//!                         └─ tool calls     → execute each in order, feed results back
//!                                              (text beside them is flushed from round 2 on)
//! after max_rounds:       model(messages, no tools) → done
//! ```
//!
//! Every call and result is persisted as it happens, so an abandoned turn
//! still leaves an audit trail.

use crate::error::TurnError;
use parley_core::agent::Agent;
use parley_core::chat::{ChatMessage, MessageToolCall};
use parley_core::error::{ProviderError, ToolError};
use parley_core::event::{ConversationEvent, EventBus};
use parley_core::message::NewMessage;
use parley_core::provider::{Provider, ProviderRequest, ProviderResponse};
use parley_core::repository::Repository;
use parley_core::tool::{ToolContext, ToolRegistry};
use parley_tools::executor::{ToolExecutor, ToolOutcome};
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct ToolLoop {
    provider: Arc<dyn Provider>,
    repo: Arc<dyn Repository>,
    events: EventBus,
    executor: ToolExecutor,
    max_rounds: usize,
    completion_timeout: Duration,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl ToolLoop {
    pub fn new(provider: Arc<dyn Provider>, repo: Arc<dyn Repository>, events: EventBus) -> Self {
        Self {
            provider,
            repo,
            events,
            executor: ToolExecutor::default(),
            max_rounds: 10,
            completion_timeout: Duration::from_secs(120),
            max_tokens: 4096,
            temperature: None,
        }
    }

    pub fn with_executor(mut self, executor: ToolExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    pub fn with_completion_timeout(mut self, timeout: Duration) -> Self {
        self.completion_timeout = timeout;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Run `agent` to a final text reply.
    ///
    /// Model failures and cancellation end the turn; tool failures are
    /// handed back to the model as `{"error": ...}` results.
    pub async fn run_turn(
        &self,
        agent: &Agent,
        mut messages: Vec<ChatMessage>,
        tools: &ToolRegistry,
        ctx: &ToolContext,
    ) -> Result<String, TurnError> {
        let definitions = tools.definitions();

        for round in 1..=self.max_rounds {
            debug!(session_id = %ctx.session_id, agent = %agent.name, round, "Tool loop round");
            let request = self.request(agent, messages.clone()).with_tools(definitions.clone());
            let response = self.complete(agent, request, &ctx.cancel).await?;

            if !response.has_tool_calls() {
                return Ok(response.message.content);
            }

            let text = response.message.content.clone();
            let calls = response.message.tool_calls.clone();
            // Narration on a follow-up round is kept; the opening preamble is not.
            if round > 1 && !text.trim().is_empty() {
                self.flush_intermediate(agent, &text).await?;
            }
            messages.push(ChatMessage::assistant_with_calls(text, calls.clone()));

            for call in &calls {
                let result = self.run_call(agent, call, tools, ctx).await?;
                messages.push(ChatMessage::tool_result(&call.id, result.to_string()));
            }
        }

        if ctx.cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }
        warn!(
            session_id = %ctx.session_id,
            agent = %agent.name,
            rounds = self.max_rounds,
            "Tool round limit reached; requesting a final answer without tools"
        );
        let response = self.complete(agent, self.request(agent, messages), &ctx.cancel).await?;
        Ok(response.message.content)
    }

    fn request(&self, agent: &Agent, messages: Vec<ChatMessage>) -> ProviderRequest {
        let request = ProviderRequest::new(&agent.model, messages).with_max_tokens(self.max_tokens);
        match self.temperature {
            Some(t) => request.with_temperature(t),
            None => request,
        }
    }

    async fn complete(
        &self,
        agent: &Agent,
        request: ProviderRequest,
        cancel: &CancellationToken,
    ) -> Result<ProviderResponse, TurnError> {
        let model_error = |source: ProviderError| TurnError::Model {
            agent_id: agent.id.clone(),
            agent_name: agent.name.clone(),
            source,
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(TurnError::Cancelled),
            r = tokio::time::timeout(self.completion_timeout, self.provider.complete(request)) => match r {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(e)) => Err(model_error(e)),
                Err(_) => Err(model_error(ProviderError::Timeout(format!(
                    "no response within {}s",
                    self.completion_timeout.as_secs()
                )))),
            },
        }
    }

    async fn flush_intermediate(&self, agent: &Agent, text: &str) -> Result<(), TurnError> {
        let message = self
            .repo
            .append_message(NewMessage::agent(&agent.session_id, &agent.id, text))
            .await?;
        self.events.publish(ConversationEvent::TurnEnd {
            session_id: agent.session_id.clone(),
            agent_id: agent.id.clone(),
            message_id: message.id,
            content: message.content,
            intermediate: true,
        });
        Ok(())
    }

    async fn run_call(
        &self,
        agent: &Agent,
        call: &MessageToolCall,
        tools: &ToolRegistry,
        ctx: &ToolContext,
    ) -> Result<Value, TurnError> {
        let args = parse_arguments(call);

        self.repo
            .append_message(NewMessage::tool_call(&ctx.session_id, &agent.id, &call.name, args.clone()))
            .await?;
        self.events.publish(ConversationEvent::ToolCall {
            session_id: ctx.session_id.clone(),
            agent_id: agent.id.clone(),
            tool_name: call.name.clone(),
            args: args.clone(),
        });

        let outcome = match self.executor.execute(tools, &call.name, args, ctx).await {
            Ok(outcome) => outcome,
            Err(ToolError::Cancelled(_)) => return Err(TurnError::Cancelled),
            Err(e) => ToolOutcome {
                result: json!({ "error": e.to_string() }),
                success: false,
                duration_ms: 0,
            },
        };

        self.repo
            .append_message(NewMessage::tool_result(&ctx.session_id, &agent.id, &call.name, &outcome.result))
            .await?;
        self.events.publish(ConversationEvent::ToolResult {
            session_id: ctx.session_id.clone(),
            agent_id: agent.id.clone(),
            tool_name: call.name.clone(),
            result: outcome.result.clone(),
            success: outcome.success,
        });
        info!(
            session_id = %ctx.session_id,
            agent = %agent.name,
            tool = %call.name,
            success = outcome.success,
            duration_ms = outcome.duration_ms,
            "Tool call recorded"
        );
        Ok(outcome.result)
    }
}

/// Tool arguments as a JSON object; anything unusable becomes `{}`.
fn parse_arguments(call: &MessageToolCall) -> Value {
    if call.arguments.trim().is_empty() {
        return json!({});
    }
    match serde_json::from_str::<Value>(&call.arguments) {
        Ok(v) if v.is_object() => v,
        Ok(other) => {
            warn!(tool = %call.name, args = %other, "Tool arguments are not an object; using {{}}");
            json!({})
        }
        Err(e) => {
            warn!(tool = %call.name, error = %e, "Malformed tool arguments; using {{}}");
            json!({})
        }
    }
}
