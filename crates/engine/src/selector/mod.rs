//! Speaker selection.
//!
//! Three strategies, chosen per session:
//! - **Fixed rotation**: `agents[turn_index mod N]` in `order_index` order.
//! - **Directed**: an explicit target wins, otherwise rotation.
//! - **Model routed**: direct address, then a small routing call, then the
//!   least-active candidate.
//!
//! A session with a single agent never runs a strategy.

pub mod directed;
pub mod rotation;
pub mod routed;

use parley_config::RoutingConfig;
use parley_core::agent::Agent;
use parley_core::message::Message;
use parley_core::provider::{Provider, ProviderRequest};
use parley_core::session::{Session, TurnOrder};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct TurnSelector {
    provider: Arc<dyn Provider>,
    config: RoutingConfig,
}

impl TurnSelector {
    pub fn new(provider: Arc<dyn Provider>, config: RoutingConfig) -> Self {
        Self { provider, config }
    }

    /// How many recent messages routing needs; zero when the strategy
    /// never looks at the transcript.
    pub fn history_needed(&self, session: &Session, agent_count: usize) -> usize {
        if session.turn_order == TurnOrder::ModelRouted && agent_count > 1 {
            self.config.history_limit
        } else {
            0
        }
    }

    /// Pick the next speaker. `None` only when there are no agents.
    pub async fn select_speaker(
        &self,
        session: &Session,
        agents: &[Agent],
        recent: &[Message],
        target: Option<&str>,
    ) -> Option<Agent> {
        let mut ordered = agents.to_vec();
        ordered.sort_by_key(|a| a.order_index);

        match ordered.len() {
            0 => return None,
            1 => return ordered.pop(),
            _ => {}
        }

        let chosen = match session.turn_order {
            TurnOrder::FixedRotation => rotation::pick(&ordered, session.current_turn_index),
            TurnOrder::Directed => target
                .and_then(|t| {
                    let found = directed::resolve(&ordered, t);
                    if found.is_none() {
                        debug!(session_id = %session.id, target = t, "Target matches no agent; using rotation");
                    }
                    found
                })
                .or_else(|| rotation::pick(&ordered, session.current_turn_index)),
            TurnOrder::ModelRouted => self.route(session, &ordered, recent).await,
        };
        chosen.cloned()
    }

    async fn route<'a>(&self, session: &Session, agents: &'a [Agent], recent: &[Message]) -> Option<&'a Agent> {
        if let Some(addressed) = routed::directly_addressed(agents, recent) {
            debug!(session_id = %session.id, agent = %addressed.name, "Directly addressed");
            return Some(addressed);
        }

        let last = routed::last_speaker(recent);
        let mut candidates: Vec<&Agent> = agents.iter().filter(|a| Some(a.id.as_str()) != last).collect();
        if candidates.is_empty() {
            candidates = agents.iter().collect();
        }
        if candidates.len() == 1 {
            return candidates.first().copied();
        }

        let counts = routed::turn_counts(recent);
        let messages = routed::routing_prompt(&candidates, agents, recent, &self.config);
        let request = ProviderRequest::new(&session.router_model, messages)
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);

        match self.provider.complete(request).await {
            Ok(response) => {
                if let Some(agent) = routed::match_reply(&response.message.content, &candidates) {
                    debug!(session_id = %session.id, agent = %agent.name, "Router picked speaker");
                    return Some(agent);
                }
                warn!(
                    session_id = %session.id,
                    reply = %response.message.content,
                    "Router reply matched no candidate; using least-active agent"
                );
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Routing call failed; using least-active agent");
            }
        }
        routed::least_turns(&candidates, &counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, agent, agent_msg, human_msg, text_response};
    use parley_core::error::ProviderError;
    use parley_core::session::NewSession;

    fn session(order: TurnOrder, turn_index: u64) -> Session {
        let mut s = NewSession::named("t").into_session();
        s.turn_order = order;
        s.current_turn_index = turn_index;
        s
    }

    fn selector(provider: Arc<ScriptedProvider>) -> TurnSelector {
        TurnSelector::new(provider, RoutingConfig::default())
    }

    #[tokio::test]
    async fn no_agents_no_speaker() {
        let provider = Arc::new(ScriptedProvider::always("x"));
        let sel = selector(provider);
        let s = session(TurnOrder::FixedRotation, 0);
        assert!(sel.select_speaker(&s, &[], &[], None).await.is_none());
    }

    #[tokio::test]
    async fn single_agent_skips_routing() {
        let provider = Arc::new(ScriptedProvider::always("Solo"));
        let sel = selector(provider.clone());
        let solo = agent("Solo", 0);
        let s = session(TurnOrder::ModelRouted, 3);
        assert_eq!(sel.history_needed(&s, 1), 0);

        let picked = sel.select_speaker(&s, &[solo.clone()], &[agent_msg(1, &solo, "hi")], None).await;
        assert_eq!(picked.unwrap().id, solo.id);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn rotation_sorts_by_order_index() {
        let provider = Arc::new(ScriptedProvider::always("x"));
        let sel = selector(provider);
        let agents = vec![agent("C", 2), agent("A", 0), agent("B", 1)];

        let mut names = Vec::new();
        for i in 0..6 {
            let s = session(TurnOrder::FixedRotation, i);
            names.push(sel.select_speaker(&s, &agents, &[], None).await.unwrap().name);
        }
        assert_eq!(names, vec!["A", "B", "C", "A", "B", "C"]);
    }

    #[tokio::test]
    async fn directed_target_or_rotation() {
        let provider = Arc::new(ScriptedProvider::always("x"));
        let sel = selector(provider);
        let agents = vec![agent("A", 0), agent("B", 1)];
        let s = session(TurnOrder::Directed, 0);

        let picked = sel.select_speaker(&s, &agents, &[], Some("b")).await.unwrap();
        assert_eq!(picked.name, "B");
        let picked = sel.select_speaker(&s, &agents, &[], Some("nobody")).await.unwrap();
        assert_eq!(picked.name, "A");
        let picked = sel.select_speaker(&s, &agents, &[], None).await.unwrap();
        assert_eq!(picked.name, "A");
    }

    #[tokio::test]
    async fn direct_address_overrides_router() {
        let provider = Arc::new(ScriptedProvider::always("Alice"));
        let sel = selector(provider.clone());
        let alice = agent("Alice", 0);
        let bob = agent("Bob", 1);
        let carol = agent("Carol", 2);
        let agents = vec![alice.clone(), bob.clone(), carol.clone()];
        let s = session(TurnOrder::ModelRouted, 1);

        let recent = vec![agent_msg(1, &alice, "Interesting. @carol, what do you think?")];
        let picked = sel.select_speaker(&s, &agents, &recent, None).await.unwrap();
        assert_eq!(picked.name, "Carol");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn human_can_hand_the_floor_back_to_last_speaker() {
        let provider = Arc::new(ScriptedProvider::always("Alice"));
        let sel = selector(provider.clone());
        let alice = agent("Alice", 0);
        let bob = agent("Bob", 1);
        let agents = vec![alice.clone(), bob.clone()];
        let s = session(TurnOrder::ModelRouted, 2);

        let recent = vec![
            agent_msg(1, &bob, "That is my view."),
            human_msg(2, "hey Bob, can you expand on that?"),
        ];
        let picked = sel.select_speaker(&s, &agents, &recent, None).await.unwrap();
        assert_eq!(picked.name, "Bob");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn last_speaker_excluded_before_routing() {
        let provider = Arc::new(ScriptedProvider::always("Alice"));
        let sel = selector(provider.clone());
        let alice = agent("Alice", 0);
        let bob = agent("Bob", 1);
        let agents = vec![alice.clone(), bob.clone()];
        let s = session(TurnOrder::ModelRouted, 1);

        // Two agents minus the last speaker leaves one: no routing call.
        let recent = vec![human_msg(1, "start"), agent_msg(2, &alice, "hello")];
        let picked = sel.select_speaker(&s, &agents, &recent, None).await.unwrap();
        assert_eq!(picked.name, "Bob");
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn router_reply_is_used() {
        let provider = Arc::new(ScriptedProvider::always("  \"carol\" "));
        let sel = selector(provider.clone());
        let alice = agent("Alice", 0);
        let agents = vec![alice.clone(), agent("Bob", 1), agent("Carol", 2)];
        let s = session(TurnOrder::ModelRouted, 1);

        let recent = vec![human_msg(1, "thoughts?"), agent_msg(2, &alice, "mine are these")];
        let picked = sel.select_speaker(&s, &agents, &recent, None).await.unwrap();
        assert_eq!(picked.name, "Carol");

        let requests = provider.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].model, s.router_model);
        assert_eq!(requests[0].max_tokens, Some(30));
        assert!(requests[0].tools.is_empty());
        assert!(requests[0].messages[0].content.contains("\"Bob\", \"Carol\""));
        assert!(!requests[0].messages[0].content.contains("- \"Alice\""));
    }

    #[tokio::test]
    async fn router_failure_falls_back_to_least_turns() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![Err(ProviderError::Network("down".into()))]));
        let sel = selector(provider.clone());
        let a = agent("A", 0);
        let b = agent("B", 1);
        let c = agent("C", 2);
        let agents = vec![a.clone(), b.clone(), c.clone()];
        let s = session(TurnOrder::ModelRouted, 4);

        let recent = vec![agent_msg(1, &b, "one"), agent_msg(2, &c, "two"), agent_msg(3, &b, "three"), agent_msg(4, &a, "four")];
        let picked = sel.select_speaker(&s, &agents, &recent, None).await.unwrap();
        assert_eq!(picked.name, "C");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn unmatched_reply_falls_back_to_least_turns() {
        let provider = Arc::new(ScriptedProvider::sequence(vec![Ok(text_response("Zed"))]));
        let sel = selector(provider);
        let a = agent("A", 0);
        let agents = vec![a.clone(), agent("B", 1), agent("C", 2)];
        let s = session(TurnOrder::ModelRouted, 1);

        let picked = sel.select_speaker(&s, &agents, &[agent_msg(1, &a, "x")], None).await.unwrap();
        assert_eq!(picked.name, "B");
    }
}
