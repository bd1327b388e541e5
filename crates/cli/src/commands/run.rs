//! `parley run`: drive a session's turns with live console output.

use crate::ApprovalMode;
use crate::console::{self, Prompter};
use crate::runtime::Runtime;
use parley_core::approval::{Approver, FixedApprover};
use parley_core::capability::ApprovalDecision;
use parley_core::provider::Provider;
use parley_engine::{ConversationEngine, StopReason};
use parley_tools::ApprovalBroker;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub struct RunOptions {
    pub turns: usize,
    pub target: Option<String>,
    pub infinite: bool,
    pub approvals: ApprovalMode,
}

pub async fn run(rt: &Runtime, session: &str, opts: RunOptions) -> Result<(), Box<dyn std::error::Error>> {
    let session = rt.find_session(session).await?;
    let agents = rt.repo.list_agents(&session.id).await?;
    if agents.is_empty() {
        return Err(format!("Session '{}' has no agents; add one with `parley agent add`", session.name).into());
    }

    let target = match opts.target.as_deref() {
        Some(key) => Some(
            agents
                .iter()
                .find(|a| a.id == key || a.name.eq_ignore_ascii_case(key))
                .map(|a| a.id.clone())
                .ok_or_else(|| format!("No agent '{key}' in session '{}'", session.name))?,
        ),
        None => None,
    };

    let provider: Arc<dyn Provider> = Arc::new(parley_providers::from_config(&rt.config)?);

    let broker = Arc::new(ApprovalBroker::new());
    let approver: Arc<dyn Approver> = match opts.approvals {
        ApprovalMode::Ask => broker.clone(),
        ApprovalMode::Approve => Arc::new(FixedApprover(ApprovalDecision::Approve)),
        ApprovalMode::Reject => Arc::new(FixedApprover(ApprovalDecision::Reject)),
    };
    let gate = rt.gate(approver);
    let catalog = Arc::new(rt.catalog(Some(gate.clone())));
    let engine = ConversationEngine::new(
        session.id.clone(),
        rt.repo.clone(),
        provider,
        catalog,
        rt.events.clone(),
    )
    .with_config(&rt.config);

    let cancel = CancellationToken::new();
    let shutdown = CancellationToken::new();

    let ctrl_c = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\n  Stopping after the current step...");
                cancel.cancel();
            }
        })
    };
    let reaper = rt.http_pool.clone().spawn_reaper(shutdown.clone());

    let prompter = matches!(opts.approvals, ApprovalMode::Ask).then(|| Prompter {
        broker: broker.clone(),
        gate: gate.clone(),
        lines: console::stdin_lines(),
    });
    let names: HashMap<String, String> = agents.iter().map(|a| (a.id.clone(), a.name.clone())).collect();
    let printer = console::spawn_printer(rt.events.subscribe(), names, prompter, shutdown.clone());

    let infinite = opts.infinite || session.is_infinite;
    println!(
        "Running '{}' with {} agent(s){}",
        session.name,
        agents.len(),
        if infinite { " until Ctrl+C" } else { "" }
    );
    let result = if infinite {
        engine.run_until_cancelled(cancel.clone()).await
    } else {
        engine.run_turns(opts.turns, target.as_deref(), cancel.clone()).await
    };

    shutdown.cancel();
    ctrl_c.abort();
    if let Err(e) = printer.await {
        warn!(error = %e, "Console printer ended abnormally");
    }
    let _ = reaper.await;

    let outcome = result?;
    let how = match &outcome.stop {
        StopReason::Finished => "finished".to_string(),
        StopReason::Rested => "resting".to_string(),
        StopReason::Cancelled => "stopped".to_string(),
        StopReason::Failed(msg) => format!("failed: {msg}"),
    };
    println!("\n{} turn(s) completed ({how}).", outcome.turns_completed);

    let pending = broker.waiting();
    if !pending.is_empty() {
        println!("Proposals left pending: {}", pending.join(", "));
        println!("Decide them with `parley approvals resolve <id> approve|reject`.");
    }
    Ok(())
}
