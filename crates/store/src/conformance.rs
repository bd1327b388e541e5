//! Behaviour every repository backend must share. Each backend's test
//! module runs these against a fresh instance.

use parley_core::agent::{AgentUpdate, NewAgent};
use parley_core::capability::{CapabilityProposal, NewCapability, ProposalStatus};
use parley_core::checkpoint::SummaryCheckpoint;
use parley_core::error::StoreError;
use parley_core::message::{MessageRole, NewMessage};
use parley_core::provider::ToolDefinition;
use parley_core::repository::Repository;
use parley_core::session::{NewSession, SessionSettings, SessionStatus, TurnCommit, TurnOrder};
use parley_core::template::NewAgentTemplate;

pub async fn sessions_and_leases(repo: &dyn Repository) {
    let mut new = NewSession::named("debate");
    new.turn_order = TurnOrder::ModelRouted;
    let session = repo.create_session(new).await.unwrap();
    assert_eq!(session.status, SessionStatus::Setup);
    assert_eq!(session.current_turn_index, 0);

    let loaded = repo.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(loaded.turn_order, TurnOrder::ModelRouted);
    assert_eq!(loaded.name, "debate");

    assert!(repo.acquire_run_lease(&session.id).await.unwrap());
    assert!(!repo.acquire_run_lease(&session.id).await.unwrap());

    let busy = repo
        .update_session_settings(&session.id, SessionSettings { is_slow: Some(true), ..Default::default() })
        .await;
    assert!(matches!(busy, Err(StoreError::SessionBusy(_))));

    repo.release_run_lease(&session.id).await.unwrap();
    let updated = repo
        .update_session_settings(&session.id, SessionSettings { is_slow: Some(true), ..Default::default() })
        .await
        .unwrap();
    assert!(updated.is_slow);

    repo.set_pending_approval(&session.id, Some("p1")).await.unwrap();
    let pending = repo.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(pending.pending_approval.as_deref(), Some("p1"));
    repo.set_pending_approval(&session.id, None).await.unwrap();
    assert!(repo.get_session(&session.id).await.unwrap().unwrap().pending_approval.is_none());

    let mut bad = NewSession::named("tiny");
    bad.window_size = 5;
    assert!(matches!(repo.create_session(bad).await, Err(StoreError::Invalid(_))));

    assert!(repo.get_session("missing").await.unwrap().is_none());
    assert!(matches!(
        repo.acquire_run_lease("missing").await,
        Err(StoreError::NotFound { .. })
    ));
}

pub async fn turn_commit_is_compare_and_set(repo: &dyn Repository) {
    let session = repo.create_session(NewSession::named("s")).await.unwrap();

    let commit = |index: u64, text: &str| TurnCommit {
        expected_index: index,
        status: SessionStatus::Active,
        reply: NewMessage::agent(&session.id, "a1", text),
    };

    let (committed, reply) = repo.commit_turn(&session.id, commit(0, "first")).await.unwrap();
    assert_eq!(committed.current_turn_index, 1);
    assert_eq!(committed.status, SessionStatus::Active);
    assert_eq!(reply.content, "first");
    assert_eq!(reply.role, MessageRole::Agent);

    // A stale commit must not skip or rewind the counter, nor leave its reply
    let stale = repo.commit_turn(&session.id, commit(0, "stale")).await;
    assert!(matches!(stale, Err(StoreError::Conflict { .. })));

    let reloaded = repo.get_session(&session.id).await.unwrap().unwrap();
    assert_eq!(reloaded.current_turn_index, 1);
    let contents: Vec<String> = repo
        .list_messages(&session.id)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.content)
        .collect();
    assert_eq!(contents, vec!["first"]);
    assert_eq!(repo.list_messages(&session.id).await.unwrap()[0].id, reply.id);

    let paused = repo.set_session_status(&session.id, SessionStatus::Paused).await.unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);
    assert_eq!(paused.current_turn_index, 1);
}

pub async fn agents_are_ordered_and_locked_while_running(repo: &dyn Repository) {
    let session = repo.create_session(NewSession::named("s")).await.unwrap();
    let bob = repo
        .create_agent(&session.id, NewAgent::new("Bob", "m", "You are Bob.").with_order(1))
        .await
        .unwrap();
    let alice = repo
        .create_agent(
            &session.id,
            NewAgent::new("Alice", "m", "You are Alice.")
                .with_order(0)
                .with_capabilities(["sleep", "calculator", "sleep"]),
        )
        .await
        .unwrap();
    assert_eq!(alice.capabilities, vec!["calculator", "sleep"]);

    let agents = repo.list_agents(&session.id).await.unwrap();
    let names: Vec<&str> = agents.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["Alice", "Bob"]);

    let duplicate = repo
        .create_agent(&session.id, NewAgent::new("alice", "m", ""))
        .await;
    assert!(matches!(duplicate, Err(StoreError::Conflict { .. })));

    assert!(repo.acquire_run_lease(&session.id).await.unwrap());
    let rejected = repo
        .update_agent(&bob.id, AgentUpdate { model: Some("other".into()), ..Default::default() })
        .await;
    assert!(matches!(rejected, Err(StoreError::SessionBusy(_))));
    let rejected = repo.create_agent(&session.id, NewAgent::new("Carol", "m", "")).await;
    assert!(matches!(rejected, Err(StoreError::SessionBusy(_))));

    // Grants go through while the run holds the session
    repo.grant_capability(&bob.id, "word_count").await.unwrap();
    repo.grant_capability(&bob.id, "word_count").await.unwrap();
    repo.release_run_lease(&session.id).await.unwrap();

    let bob = repo.get_agent(&bob.id).await.unwrap().unwrap();
    assert_eq!(bob.capabilities, vec!["word_count"]);

    let renamed = repo
        .update_agent(&bob.id, AgentUpdate { name: Some("Robert".into()), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(renamed.name, "Robert");
    assert_eq!(renamed.capabilities, vec!["word_count"]);
}

pub async fn messages_keep_transcript_order(repo: &dyn Repository) {
    let session = repo.create_session(NewSession::named("s")).await.unwrap();
    let agent = repo
        .create_agent(&session.id, NewAgent::new("Alice", "m", ""))
        .await
        .unwrap();

    repo.append_message(NewMessage::human(&session.id, "hello")).await.unwrap();
    let args = serde_json::json!({"expression": "6*7"});
    let call = repo
        .append_message(NewMessage::tool_call(&session.id, &agent.id, "calculator", args.clone()))
        .await
        .unwrap();
    repo.append_message(NewMessage::tool_result(
        &session.id,
        &agent.id,
        "calculator",
        &serde_json::json!({"result": 42}),
    ))
    .await
    .unwrap();
    repo.append_message(NewMessage::agent(&session.id, &agent.id, "It is 42."))
        .await
        .unwrap();

    assert_eq!(call.tool_args, Some(args));

    let all = repo.list_messages(&session.id).await.unwrap();
    let roles: Vec<MessageRole> = all.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![MessageRole::Human, MessageRole::ToolCall, MessageRole::ToolResult, MessageRole::Agent]
    );
    assert!(all.windows(2).all(|w| w[0].order_key() < w[1].order_key()));
    assert_eq!(all[1].tool_name.as_deref(), Some("calculator"));
    assert_eq!(all[3].agent_id.as_deref(), Some(agent.id.as_str()));

    let recent = repo.recent_messages(&session.id, 2).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].role, MessageRole::ToolResult);
    assert_eq!(recent[1].content, "It is 42.");

    let missing = repo.append_message(NewMessage::human("missing", "hi")).await;
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));
}

pub async fn sessions_are_isolated(repo: &dyn Repository) {
    let a = repo.create_session(NewSession::named("a")).await.unwrap();
    let b = repo.create_session(NewSession::named("b")).await.unwrap();
    repo.append_message(NewMessage::human(&a.id, "for a")).await.unwrap();
    repo.create_agent(&b.id, NewAgent::new("Bee", "m", "")).await.unwrap();

    assert!(repo.list_messages(&b.id).await.unwrap().is_empty());
    assert!(repo.list_agents(&a.id).await.unwrap().is_empty());

    assert!(repo.acquire_run_lease(&a.id).await.unwrap());
    // b is not held by a's run
    repo.create_agent(&b.id, NewAgent::new("Cee", "m", "")).await.unwrap();
    assert_eq!(repo.list_sessions().await.unwrap().len(), 2);
}

pub async fn checkpoints_reject_overlap(repo: &dyn Repository) {
    let session = repo.create_session(NewSession::named("s")).await.unwrap();
    for i in 0..10 {
        repo.append_message(NewMessage::human(&session.id, format!("m{i}")))
            .await
            .unwrap();
    }
    let messages = repo.list_messages(&session.id).await.unwrap();

    let late = SummaryCheckpoint::covering(&session.id, "late", &messages[5..]).unwrap();
    let early = SummaryCheckpoint::covering(&session.id, "early", &messages[..5]).unwrap();
    repo.create_checkpoint(late).await.unwrap();
    repo.create_checkpoint(early).await.unwrap();

    let overlapping = SummaryCheckpoint::covering(&session.id, "again", &messages[3..7]).unwrap();
    assert!(matches!(
        repo.create_checkpoint(overlapping).await,
        Err(StoreError::Conflict { .. })
    ));

    let stored = repo.list_checkpoints(&session.id).await.unwrap();
    let texts: Vec<&str> = stored.iter().map(|c| c.summary.as_str()).collect();
    assert_eq!(texts, vec!["early", "late"]);
    assert_eq!(stored[0].message_count, 5);
    assert_eq!(stored[1].end_key(), messages[9].order_key());
}

pub async fn capabilities_protect_builtins(repo: &dyn Repository) {
    let builtin = NewCapability::builtin(ToolDefinition {
        name: "sleep".into(),
        description: "Pause".into(),
        parameters: serde_json::json!({"type": "object"}),
    });
    repo.create_capability(builtin.clone()).await.unwrap();
    assert!(matches!(
        repo.create_capability(builtin).await,
        Err(StoreError::Conflict { .. })
    ));

    let user = NewCapability {
        name: "word_count".into(),
        description: "Count words".into(),
        parameters: serde_json::json!({"type": "object", "properties": {"text": {"type": "string"}}}),
        code: "wc -w".into(),
        interpreter: Some("sh".into()),
        builtin: false,
    };
    repo.create_capability(user).await.unwrap();

    let stored = repo.get_capability("word_count").await.unwrap().unwrap();
    assert!(!stored.builtin);
    assert_eq!(stored.interpreter.as_deref(), Some("sh"));
    assert_eq!(stored.parameters["properties"]["text"]["type"], "string");

    let session = repo.create_session(NewSession::named("s")).await.unwrap();
    let agent = repo
        .create_agent(&session.id, NewAgent::new("A", "m", "").with_capabilities(["word_count", "sleep"]))
        .await
        .unwrap();

    assert!(matches!(
        repo.delete_capability("sleep").await,
        Err(StoreError::BuiltinProtected(_))
    ));
    assert!(repo.delete_capability("word_count").await.unwrap());
    assert!(!repo.delete_capability("word_count").await.unwrap());

    let names: Vec<String> = repo
        .list_capabilities()
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["sleep"]);

    let agent = repo.get_agent(&agent.id).await.unwrap().unwrap();
    assert_eq!(agent.capabilities, vec!["sleep"]);
}

pub async fn proposals_decide_once(repo: &dyn Repository) {
    let proposal = CapabilityProposal::pending(
        "s",
        "a",
        "word_count",
        "Count words",
        serde_json::json!({"type": "object"}),
        "wc -w",
        Some("sh".into()),
    );
    repo.create_proposal(proposal.clone()).await.unwrap();

    let pending = repo.list_proposals(Some(ProposalStatus::Pending)).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, proposal.id);

    assert!(repo.decide_proposal(&proposal.id, ProposalStatus::Rejected).await.unwrap());
    assert!(!repo.decide_proposal(&proposal.id, ProposalStatus::Approved).await.unwrap());

    let decided = repo.get_proposal(&proposal.id).await.unwrap().unwrap();
    assert_eq!(decided.status, ProposalStatus::Rejected);
    assert!(decided.decided_at.is_some());
    assert!(repo.list_proposals(Some(ProposalStatus::Pending)).await.unwrap().is_empty());
    assert_eq!(repo.list_proposals(None).await.unwrap().len(), 1);

    assert!(matches!(
        repo.decide_proposal("missing", ProposalStatus::Approved).await,
        Err(StoreError::NotFound { .. })
    ));
}

pub async fn templates_upsert_by_name(repo: &dyn Repository) {
    let critic = repo
        .upsert_template(NewAgentTemplate::new("Critic", "model-a", "Find the flaw.").with_tools(["calculator"]))
        .await
        .unwrap();
    repo.upsert_template(NewAgentTemplate::new("Advocate", "model-a", "Defend it."))
        .await
        .unwrap();

    let names: Vec<String> = repo.list_templates().await.unwrap().into_iter().map(|t| t.name).collect();
    assert_eq!(names, vec!["Advocate", "Critic"]);

    // Saving under the same name replaces the preset in place
    let resaved = repo
        .upsert_template(NewAgentTemplate::new("Critic", "model-b", "Find two flaws."))
        .await
        .unwrap();
    assert_eq!(resaved.id, critic.id);
    assert_eq!(resaved.created_at, critic.created_at);
    assert_eq!(resaved.model, "model-b");
    assert!(resaved.tool_ids.is_empty());
    assert_eq!(repo.list_templates().await.unwrap().len(), 2);

    let loaded = repo.get_template("Critic").await.unwrap().unwrap();
    assert_eq!(loaded, resaved);

    assert!(matches!(
        repo.upsert_template(NewAgentTemplate::new("", "m", "p")).await,
        Err(StoreError::Invalid(_))
    ));

    assert!(repo.delete_template("Critic").await.unwrap());
    assert!(!repo.delete_template("Critic").await.unwrap());
    assert!(repo.get_template("Critic").await.unwrap().is_none());
}
