//! The conversation engine: drives turns for one session.

use crate::compaction::MemoryCompactor;
use crate::error::{EngineError, TurnError};
use crate::perspective;
use crate::selector::TurnSelector;
use crate::tool_loop::ToolLoop;
use parley_config::AppConfig;
use parley_core::error::StoreError;
use parley_core::event::{ConversationEvent, EventBus};
use parley_core::message::{Message, NewMessage};
use parley_core::provider::Provider;
use parley_core::repository::Repository;
use parley_core::session::{Session, SessionStatus, TurnCommit};
use parley_core::tool::{RestSignal, ToolContext};
use parley_tools::catalog::CapabilityCatalog;
use parley_tools::executor::ToolExecutor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Why a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// All requested turns completed.
    Finished,
    /// A speaker asked the conversation to rest.
    Rested,
    Cancelled,
    /// A turn failed; the message is what the error event carried.
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub turns_completed: usize,
    pub stop: StopReason,
}

#[derive(Clone, Copy)]
enum RunMode {
    Bounded,
    Open,
}

/// Drives the turns of one session.
///
/// Holds no conversation state of its own: every turn re-reads the session,
/// roster, transcript and grants from the repository.
pub struct ConversationEngine {
    session_id: String,
    repo: Arc<dyn Repository>,
    provider: Arc<dyn Provider>,
    catalog: Arc<CapabilityCatalog>,
    events: EventBus,
    selector: TurnSelector,
    compactor: MemoryCompactor,
    tool_loop: ToolLoop,
    rest: RestSignal,
    slow_delay: Duration,
    turn_pause: Duration,
    infinite_pause: Duration,
}

impl ConversationEngine {
    pub fn new(
        session_id: impl Into<String>,
        repo: Arc<dyn Repository>,
        provider: Arc<dyn Provider>,
        catalog: Arc<CapabilityCatalog>,
        events: EventBus,
    ) -> Self {
        let config = AppConfig::default();
        Self {
            session_id: session_id.into(),
            selector: TurnSelector::new(provider.clone(), config.routing.clone()),
            compactor: MemoryCompactor::new(repo.clone(), provider.clone(), config.memory.clone()),
            tool_loop: ToolLoop::new(provider.clone(), repo.clone(), events.clone()),
            repo,
            provider,
            catalog,
            events,
            rest: RestSignal::new(),
            slow_delay: Duration::ZERO,
            turn_pause: Duration::ZERO,
            infinite_pause: Duration::ZERO,
        }
        .with_config(&config)
    }

    /// Apply pacing, routing, memory and tool-loop settings.
    pub fn with_config(mut self, config: &AppConfig) -> Self {
        self.selector = TurnSelector::new(self.provider.clone(), config.routing.clone());
        self.compactor = MemoryCompactor::new(self.repo.clone(), self.provider.clone(), config.memory.clone());
        self.tool_loop = ToolLoop::new(self.provider.clone(), self.repo.clone(), self.events.clone())
            .with_executor(ToolExecutor::new(config.tools.timeout()))
            .with_max_rounds(config.engine.max_tool_rounds)
            .with_completion_timeout(config.engine.completion_timeout())
            .with_max_tokens(config.default_max_tokens)
            .with_temperature(config.default_temperature);
        self.slow_delay = config.engine.slow_delay();
        self.turn_pause = config.engine.turn_pause();
        self.infinite_pause = config.engine.infinite_pause();
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Append a Human message to the transcript.
    pub async fn add_human_message(&self, content: &str) -> Result<Message, EngineError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(StoreError::Invalid("message must not be empty".into()).into());
        }
        self.load_session().await?;
        let message = self.repo.append_message(NewMessage::human(&self.session_id, content)).await?;
        debug!(session_id = %self.session_id, message_id = %message.id, "Human message added");
        Ok(message)
    }

    /// Run up to `turns` turns. `target` names the first speaker in a
    /// directed session; later turns fall back to the session's order.
    pub async fn run_turns(
        &self,
        turns: usize,
        target: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<RunOutcome, EngineError> {
        self.acquire().await?;
        info!(session_id = %self.session_id, turns, target = ?target, "Starting bounded run");

        let mut completed = 0;
        let mut stop = StopReason::Finished;
        for i in 0..turns {
            if i > 0 && pause(self.turn_pause, &cancel).await.is_err() {
                stop = StopReason::Cancelled;
                break;
            }
            let turn_target = if i == 0 { target } else { None };
            match self.execute_turn(turn_target, &cancel).await {
                Ok(()) => completed += 1,
                Err(e) => {
                    stop = self.turn_failed(e);
                    break;
                }
            }
            if self.rest.take() {
                stop = StopReason::Rested;
                break;
            }
        }

        self.finish(RunMode::Bounded, completed, stop).await
    }

    /// Run turns until `cancel` fires, a speaker rests, or a turn fails.
    pub async fn run_until_cancelled(&self, cancel: CancellationToken) -> Result<RunOutcome, EngineError> {
        self.acquire().await?;
        info!(session_id = %self.session_id, "Starting open-ended run");

        let mut completed = 0;
        let stop = loop {
            if completed > 0 && pause(self.infinite_pause, &cancel).await.is_err() {
                break StopReason::Cancelled;
            }
            if let Err(e) = self.execute_turn(None, &cancel).await {
                break self.turn_failed(e);
            }
            completed += 1;
            if self.rest.take() {
                break StopReason::Rested;
            }
        };

        self.finish(RunMode::Open, completed, stop).await
    }

    async fn load_session(&self) -> Result<Session, EngineError> {
        self.repo
            .get_session(&self.session_id)
            .await?
            .ok_or_else(|| EngineError::SessionNotFound(self.session_id.clone()))
    }

    async fn acquire(&self) -> Result<(), EngineError> {
        self.load_session().await?;
        if !self.repo.acquire_run_lease(&self.session_id).await? {
            return Err(EngineError::SessionBusy(self.session_id.clone()));
        }
        // A rest left over from an earlier run must not end this one.
        self.rest.take();
        Ok(())
    }

    /// Map a turn failure to a stop reason, reporting it unless cancelled.
    fn turn_failed(&self, e: TurnError) -> StopReason {
        if matches!(e, TurnError::Cancelled) {
            debug!(session_id = %self.session_id, "Turn cancelled");
            return StopReason::Cancelled;
        }
        error!(session_id = %self.session_id, error = %e, "Turn failed");
        let message = e.to_string();
        self.events.publish(ConversationEvent::Error {
            session_id: self.session_id.clone(),
            agent_id: e.agent_id().map(str::to_string),
            message: message.clone(),
        });
        StopReason::Failed(message)
    }

    /// Record the final status, emit the one terminal event, drop the lease.
    async fn finish(&self, mode: RunMode, turns_completed: usize, stop: StopReason) -> Result<RunOutcome, EngineError> {
        let session_id = self.session_id.clone();
        let (status, event) = match (&stop, mode) {
            (StopReason::Rested, _) => (SessionStatus::Paused, ConversationEvent::ConversationResting { session_id }),
            (_, RunMode::Bounded) => (SessionStatus::Paused, ConversationEvent::ConversationPaused { session_id }),
            (StopReason::Cancelled, RunMode::Open) => {
                (SessionStatus::Completed, ConversationEvent::ConversationComplete { session_id })
            }
            (_, RunMode::Open) => (SessionStatus::Paused, ConversationEvent::ConversationComplete { session_id }),
        };

        let status_result = self.repo.set_session_status(&self.session_id, status).await;
        self.events.publish(event);
        if let Err(e) = self.repo.release_run_lease(&self.session_id).await {
            warn!(session_id = %self.session_id, error = %e, "Could not release run lease");
        }
        status_result?;

        info!(
            session_id = %self.session_id,
            turns_completed,
            stop = ?stop,
            status = %status,
            "Run ended"
        );
        Ok(RunOutcome { turns_completed, stop })
    }

    /// One full turn. Nothing from the final reply is persisted unless the
    /// turn completes.
    async fn execute_turn(&self, target: Option<&str>, cancel: &CancellationToken) -> Result<(), TurnError> {
        if cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }
        let session = self
            .repo
            .get_session(&self.session_id)
            .await?
            .ok_or_else(|| TurnError::SessionNotFound(self.session_id.clone()))?;

        if session.is_slow {
            pause(self.slow_delay, cancel).await?;
        }

        let agents = self.repo.list_agents(&session.id).await?;
        let needed = self.selector.history_needed(&session, agents.len());
        let recent = if needed > 0 {
            self.repo.recent_messages(&session.id, needed).await?
        } else {
            Vec::new()
        };

        let speaker = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TurnError::Cancelled),
            s = self.selector.select_speaker(&session, &agents, &recent, target) => s,
        }
        .ok_or(TurnError::NoSpeaker)?;

        self.events.publish(ConversationEvent::TurnStart {
            session_id: session.id.clone(),
            agent_id: speaker.id.clone(),
            agent_name: speaker.name.clone(),
            turn_index: session.current_turn_index,
        });
        info!(
            session_id = %session.id,
            agent = %speaker.name,
            turn = session.current_turn_index,
            "Turn started"
        );

        let history = self.repo.list_messages(&session.id).await?;
        let context = self.compactor.build_context(&session, &agents, history).await?;
        if cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }
        let messages = perspective::format_for_speaker(&context, &speaker, &agents);

        let tools = self.catalog.tool_set_for(&speaker).await?;
        let ctx = ToolContext::new(&session.id, &speaker.id, &speaker.name)
            .with_cancel(cancel.clone())
            .with_rest(self.rest.clone());
        let reply = self.tool_loop.run_turn(&speaker, messages, &tools, &ctx).await?;
        if cancel.is_cancelled() {
            return Err(TurnError::Cancelled);
        }

        let (_, message) = self
            .repo
            .commit_turn(
                &session.id,
                TurnCommit {
                    expected_index: session.current_turn_index,
                    status: SessionStatus::Active,
                    reply: NewMessage::agent(&session.id, &speaker.id, reply),
                },
            )
            .await?;

        self.events.publish(ConversationEvent::TurnEnd {
            session_id: session.id.clone(),
            agent_id: speaker.id.clone(),
            message_id: message.id,
            content: message.content,
            intermediate: false,
        });
        Ok(())
    }
}

/// Sleep for `duration` unless cancelled first.
async fn pause(duration: Duration, cancel: &CancellationToken) -> Result<(), TurnError> {
    if duration.is_zero() {
        return if cancel.is_cancelled() { Err(TurnError::Cancelled) } else { Ok(()) };
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(TurnError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, text_response, tool_call, tool_call_response};
    use parley_core::agent::{Agent, NewAgent};
    use parley_core::error::ProviderError;
    use parley_core::message::MessageRole;
    use parley_core::session::{NewSession, TurnOrder};
    use parley_store::InMemoryStore;
    use parley_tools::sandbox::SandboxConfig;
    use parley_tools::take_rest::TakeRestTool;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::broadcast::Receiver;

    struct Setup {
        repo: Arc<InMemoryStore>,
        session: Session,
        agents: Vec<Agent>,
        events: EventBus,
    }

    async fn setup(order: TurnOrder, names: &[&str]) -> Setup {
        let repo = Arc::new(InMemoryStore::new());
        let mut new = NewSession::named("debate");
        new.turn_order = order;
        let session = repo.create_session(new).await.unwrap();
        let mut agents = Vec::new();
        for name in names {
            let agent = repo
                .create_agent(
                    &session.id,
                    NewAgent::new(*name, "agent-model", format!("You are {name}.")).with_capabilities(["take_rest"]),
                )
                .await
                .unwrap();
            agents.push(agent);
        }
        Setup {
            repo,
            session,
            agents,
            events: EventBus::default(),
        }
    }

    fn engine(s: &Setup, provider: Arc<ScriptedProvider>) -> ConversationEngine {
        let catalog = CapabilityCatalog::new(s.repo.clone(), SandboxConfig::default())
            .with_builtins([Arc::new(TakeRestTool) as Arc<dyn parley_core::tool::Tool>]);
        ConversationEngine::new(&s.session.id, s.repo.clone(), provider, Arc::new(catalog), s.events.clone())
    }

    async fn seed(s: &Setup) {
        CapabilityCatalog::new(s.repo.clone(), SandboxConfig::default())
            .with_builtins([Arc::new(TakeRestTool) as Arc<dyn parley_core::tool::Tool>])
            .seed()
            .await
            .unwrap();
    }

    fn drain(rx: &mut Receiver<Arc<ConversationEvent>>) -> Vec<Arc<ConversationEvent>> {
        let mut out = Vec::new();
        while let Ok(e) = rx.try_recv() {
            out.push(e);
        }
        out
    }

    fn terminal_types(events: &[Arc<ConversationEvent>]) -> Vec<&'static str> {
        events.iter().filter(|e| e.is_terminal()).map(|e| e.event_type()).collect()
    }

    async fn agent_speakers(s: &Setup) -> Vec<String> {
        let messages = s.repo.list_messages(&s.session.id).await.unwrap();
        messages
            .iter()
            .filter(|m| m.role == MessageRole::Agent)
            .filter_map(|m| s.agents.iter().find(|a| Some(a.id.as_str()) == m.agent_id.as_deref()))
            .map(|a| a.name.clone())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn rotation_runs_in_order() {
        let s = setup(TurnOrder::FixedRotation, &["A", "B"]).await;
        let provider = Arc::new(ScriptedProvider::always("My point."));
        let mut rx = s.events.subscribe();

        let outcome = engine(&s, provider).run_turns(3, None, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome { turns_completed: 3, stop: StopReason::Finished });
        assert_eq!(agent_speakers(&s).await, vec!["A", "B", "A"]);

        let session = s.repo.get_session(&s.session.id).await.unwrap().unwrap();
        assert_eq!(session.current_turn_index, 3);
        assert_eq!(session.status, SessionStatus::Paused);
        assert!(!session.run_lease);

        let events = drain(&mut rx);
        assert_eq!(terminal_types(&events), vec!["conversation_paused"]);
        assert_eq!(events.iter().filter(|e| e.event_type() == "turn_start").count(), 3);
        assert_eq!(events.iter().filter(|e| e.event_type() == "turn_end").count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn turns_are_paced() {
        let s = setup(TurnOrder::FixedRotation, &["A", "B"]).await;
        let provider = Arc::new(ScriptedProvider::always("x"));
        let start = tokio::time::Instant::now();
        engine(&s, provider).run_turns(3, None, CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_mode_delays_each_turn() {
        let s = setup(TurnOrder::FixedRotation, &["A"]).await;
        s.repo
            .update_session_settings(
                &s.session.id,
                parley_core::session::SessionSettings {
                    is_slow: Some(true),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let provider = Arc::new(ScriptedProvider::always("x"));
        let start = tokio::time::Instant::now();
        engine(&s, provider).run_turns(1, None, CancellationToken::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn target_applies_to_first_turn_only() {
        let s = setup(TurnOrder::Directed, &["A", "B", "C"]).await;
        let provider = Arc::new(ScriptedProvider::always("x"));
        engine(&s, provider).run_turns(2, Some("c"), CancellationToken::new()).await.unwrap();
        assert_eq!(agent_speakers(&s).await, vec!["C", "B"]);
    }

    #[tokio::test(start_paused = true)]
    async fn single_agent_never_routes() {
        let s = setup(TurnOrder::ModelRouted, &["Solo"]).await;
        let provider = Arc::new(ScriptedProvider::always("thinking aloud"));
        engine(&s, provider.clone()).run_turns(3, None, CancellationToken::new()).await.unwrap();
        assert_eq!(provider.calls_to(&s.session.router_model), 0);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn model_failure_ends_run_without_advancing() {
        let s = setup(TurnOrder::FixedRotation, &["A", "B"]).await;
        let provider = Arc::new(ScriptedProvider::sequence(vec![
            Ok(text_response("first")),
            Err(ProviderError::AuthenticationFailed("bad key".into())),
        ]));
        let mut rx = s.events.subscribe();

        let outcome = engine(&s, provider).run_turns(5, None, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.turns_completed, 1);
        assert!(matches!(outcome.stop, StopReason::Failed(_)));

        let session = s.repo.get_session(&s.session.id).await.unwrap().unwrap();
        assert_eq!(session.current_turn_index, 1);

        let events = drain(&mut rx);
        let error = events.iter().find(|e| e.event_type() == "error").unwrap();
        match error.as_ref() {
            ConversationEvent::Error { agent_id, .. } => assert_eq!(agent_id.as_deref(), Some(s.agents[1].id.as_str())),
            _ => unreachable!(),
        }
        assert_eq!(terminal_types(&events), vec!["conversation_paused"]);
    }

    #[tokio::test(start_paused = true)]
    async fn no_agents_reports_no_speaker() {
        let s = setup(TurnOrder::FixedRotation, &[]).await;
        let provider = Arc::new(ScriptedProvider::always("x"));
        let mut rx = s.events.subscribe();

        let outcome = engine(&s, provider).run_turns(1, None, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome.stop, StopReason::Failed("No agent available to speak".into()));
        let events = drain(&mut rx);
        assert_eq!(events[0].event_type(), "error");
        assert_eq!(terminal_types(&events), vec!["conversation_paused"]);
    }

    #[tokio::test(start_paused = true)]
    async fn take_rest_ends_the_run() {
        let s = setup(TurnOrder::FixedRotation, &["A", "B"]).await;
        seed(&s).await;
        let provider = Arc::new(ScriptedProvider::sequence(vec![
            Ok(tool_call_response("", vec![tool_call("r1", "take_rest", r#"{"reason":"done"}"#)])),
            Ok(text_response("Let's stop here.")),
        ]));
        let mut rx = s.events.subscribe();

        let outcome = engine(&s, provider).run_turns(5, None, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, RunOutcome { turns_completed: 1, stop: StopReason::Rested });
        assert_eq!(terminal_types(&drain(&mut rx)), vec!["conversation_resting"]);
        let session = s.repo.get_session(&s.session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn open_run_stops_on_cancel() {
        let s = setup(TurnOrder::FixedRotation, &["A", "B"]).await;
        let cancel = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = {
            let cancel = cancel.clone();
            let calls = calls.clone();
            Arc::new(ScriptedProvider::from_fn(move |_| {
                if calls.fetch_add(1, Ordering::SeqCst) == 2 {
                    cancel.cancel();
                }
                Ok(text_response("more"))
            }))
        };
        let mut rx = s.events.subscribe();

        let outcome = engine(&s, provider).run_until_cancelled(cancel).await.unwrap();
        // The third reply arrives after cancellation and is discarded.
        assert_eq!(outcome, RunOutcome { turns_completed: 2, stop: StopReason::Cancelled });
        assert_eq!(agent_speakers(&s).await.len(), 2);

        let session = s.repo.get_session(&s.session.id).await.unwrap().unwrap();
        assert_eq!(session.status, SessionStatus::Completed);
        assert_eq!(session.current_turn_index, 2);
        assert_eq!(terminal_types(&drain(&mut rx)), vec!["conversation_complete"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_before_start_runs_nothing() {
        let s = setup(TurnOrder::FixedRotation, &["A"]).await;
        let provider = Arc::new(ScriptedProvider::always("x"));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = engine(&s, provider.clone()).run_turns(3, None, cancel).await.unwrap();
        assert_eq!(outcome, RunOutcome { turns_completed: 0, stop: StopReason::Cancelled });
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn second_run_is_rejected_while_leased() {
        let s = setup(TurnOrder::FixedRotation, &["A"]).await;
        assert!(s.repo.acquire_run_lease(&s.session.id).await.unwrap());
        let provider = Arc::new(ScriptedProvider::always("x"));

        let err = engine(&s, provider).run_turns(1, None, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::SessionBusy(_)));
    }

    #[tokio::test]
    async fn human_messages_are_appended() {
        let s = setup(TurnOrder::FixedRotation, &["A"]).await;
        let eng = engine(&s, Arc::new(ScriptedProvider::always("x")));
        let msg = eng.add_human_message("  Debate tabs vs spaces ").await.unwrap();
        assert_eq!(msg.role, MessageRole::Human);
        assert_eq!(msg.content, "Debate tabs vs spaces");
        assert!(eng.add_human_message("   ").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn speaker_sees_others_as_users() {
        let s = setup(TurnOrder::FixedRotation, &["A", "B"]).await;
        seed(&s).await;
        let provider = Arc::new(ScriptedProvider::always("noted"));
        let eng = engine(&s, provider.clone());
        eng.add_human_message("Start").await.unwrap();
        eng.run_turns(2, None, CancellationToken::new()).await.unwrap();

        let second = &provider.requests()[1];
        assert_eq!(second.messages[0].content, "You are B.");
        assert_eq!(second.messages[1].content, "[Human]: Start");
        assert_eq!(second.messages[2].content, "[A]: noted");
        assert!(second.tools.iter().any(|t| t.name == "take_rest"));
    }
}
