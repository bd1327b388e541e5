//! Shared test helpers: a scriptable provider and fixture builders.

use chrono::{DateTime, Duration, Utc};
use parley_core::agent::{Agent, NewAgent};
use parley_core::chat::{ChatMessage, MessageToolCall};
use parley_core::message::{Message, NewMessage};
use parley_core::error::ProviderError;
use parley_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use std::collections::VecDeque;
use std::sync::Mutex;

type Responder = Box<dyn Fn(&ProviderRequest) -> Result<ProviderResponse, ProviderError> + Send + Sync>;

/// A provider whose replies come from a queue or a closure.
///
/// Every request is recorded so tests can count calls and inspect what was
/// sent. Queued replies are used first; once the queue is empty the
/// fallback closure answers.
pub struct ScriptedProvider {
    queue: Mutex<VecDeque<Result<ProviderResponse, ProviderError>>>,
    fallback: Responder,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn from_fn(
        f: impl Fn(&ProviderRequest) -> Result<ProviderResponse, ProviderError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            fallback: Box::new(f),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `text`.
    pub fn always(text: &str) -> Self {
        let text = text.to_string();
        Self::from_fn(move |_| Ok(text_response(&text)))
    }

    /// Answer from `responses` in order; fail once they run out.
    pub fn sequence(responses: Vec<Result<ProviderResponse, ProviderError>>) -> Self {
        let provider = Self::from_fn(|_| {
            Err(ProviderError::ApiError {
                status_code: 500,
                message: "script exhausted".into(),
            })
        });
        *provider.queue.lock().unwrap() = responses.into();
        provider
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests sent to `model`.
    pub fn calls_to(&self, model: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|r| r.model == model).count()
    }
}

#[async_trait::async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request.clone());
        let queued = self.queue.lock().unwrap().pop_front();
        match queued {
            Some(response) => response,
            None => (self.fallback)(&request),
        }
    }
}

pub fn text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: ChatMessage::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

pub fn tool_call_response(text: &str, calls: Vec<MessageToolCall>) -> ProviderResponse {
    ProviderResponse {
        message: ChatMessage::assistant_with_calls(text, calls),
        usage: None,
        model: "mock-model".into(),
    }
}

pub fn tool_call(id: &str, name: &str, arguments: &str) -> MessageToolCall {
    MessageToolCall {
        id: id.into(),
        name: name.into(),
        arguments: arguments.into(),
    }
}

pub const AGENT_MODEL: &str = "agent-model";

pub fn agent(name: &str, order: i64) -> Agent {
    NewAgent::new(name, AGENT_MODEL, format!("You are {name}."))
        .with_order(order)
        .into_agent("s1", order as usize)
}

fn at(seq: i64) -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH + Duration::days(365 * 50) + Duration::seconds(seq)
}

pub fn human_msg(seq: i64, text: &str) -> Message {
    NewMessage::human("s1", text).into_message(format!("m{seq}"), seq, at(seq))
}

pub fn agent_msg(seq: i64, speaker: &Agent, text: &str) -> Message {
    NewMessage::agent("s1", &speaker.id, text).into_message(format!("m{seq}"), seq, at(seq))
}
