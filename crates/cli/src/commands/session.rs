//! `parley session`: create, list, inspect and configure sessions.

use crate::console;
use crate::runtime::Runtime;
use parley_core::session::{MemoryStrategy, NewSession, SessionSettings, TurnOrder};
use std::collections::HashMap;

pub struct CreateOptions {
    pub name: String,
    pub order: String,
    pub memory: String,
    pub window: Option<usize>,
    pub router_model: Option<String>,
    pub slow: bool,
    pub infinite: bool,
}

pub struct SetOptions {
    pub order: Option<String>,
    pub memory: Option<String>,
    pub window: Option<usize>,
    pub router_model: Option<String>,
    pub slow: Option<bool>,
    pub infinite: Option<bool>,
}

pub async fn create(rt: &Runtime, opts: CreateOptions) -> Result<(), Box<dyn std::error::Error>> {
    let mut new = NewSession::named(opts.name);
    new.turn_order = opts.order.parse::<TurnOrder>()?;
    new.memory_strategy = opts.memory.parse::<MemoryStrategy>()?;
    if let Some(window) = opts.window {
        new.window_size = window;
    }
    if let Some(model) = opts.router_model {
        new.router_model = model;
    }
    new.is_slow = opts.slow;
    new.is_infinite = opts.infinite;

    let session = rt.repo.create_session(new).await?;
    println!("✅ Created session '{}' ({})", session.name, session.id);
    println!(
        "   order={} memory={} window={}",
        session.turn_order, session.memory_strategy, session.window_size
    );
    Ok(())
}

pub async fn list(rt: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let sessions = rt.repo.list_sessions().await?;
    if sessions.is_empty() {
        println!("No sessions yet. Create one with `parley session create <name>`.");
        return Ok(());
    }
    println!("{:<38} {:<20} {:<10} {:<15} {:>6}", "ID", "NAME", "STATUS", "ORDER", "TURNS");
    for s in sessions {
        println!(
            "{:<38} {:<20} {:<10} {:<15} {:>6}",
            s.id,
            s.name,
            s.status.as_str(),
            s.turn_order.as_str(),
            s.current_turn_index
        );
    }
    Ok(())
}

pub async fn show(rt: &Runtime, session: &str, last: Option<usize>) -> Result<(), Box<dyn std::error::Error>> {
    let session = rt.find_session(session).await?;
    let agents = rt.repo.list_agents(&session.id).await?;

    println!("Session '{}' ({})", session.name, session.id);
    println!("  Status:    {}", session.status);
    println!("  Turns:     {}", session.current_turn_index);
    println!("  Order:     {}", session.turn_order);
    println!("  Memory:    {} (window {})", session.memory_strategy, session.window_size);
    println!("  Router:    {}", session.router_model);
    println!("  Pacing:    slow={} infinite={}", session.is_slow, session.is_infinite);
    if let Some(pending) = &session.pending_approval {
        println!("  Waiting on proposal {pending}");
    }

    println!("\nAgents:");
    if agents.is_empty() {
        println!("  (none)");
    }
    for agent in &agents {
        let tools = if agent.capabilities.is_empty() {
            "-".to_string()
        } else {
            agent.capabilities.join(", ")
        };
        println!(
            "  {}. {} [{}] model={} tools={}",
            agent.order_index, agent.name, agent.id, agent.model, tools
        );
    }

    let messages = match last {
        Some(n) => rt.repo.recent_messages(&session.id, n).await?,
        None => rt.repo.list_messages(&session.id).await?,
    };
    let names: HashMap<String, String> = agents.iter().map(|a| (a.id.clone(), a.name.clone())).collect();

    println!("\nTranscript ({} messages):", messages.len());
    for message in &messages {
        println!("  {}", console::format_message(message, &names));
    }
    Ok(())
}

pub async fn set(rt: &Runtime, session: &str, opts: SetOptions) -> Result<(), Box<dyn std::error::Error>> {
    let session = rt.find_session(session).await?;
    let settings = SessionSettings {
        turn_order: opts.order.as_deref().map(str::parse).transpose()?,
        memory_strategy: opts.memory.as_deref().map(str::parse).transpose()?,
        window_size: opts.window,
        is_infinite: opts.infinite,
        is_slow: opts.slow,
        router_model: opts.router_model,
    };
    let updated = rt.repo.update_session_settings(&session.id, settings).await?;
    println!(
        "✅ Updated '{}': order={} memory={} window={} slow={} infinite={} router={}",
        updated.name,
        updated.turn_order,
        updated.memory_strategy,
        updated.window_size,
        updated.is_slow,
        updated.is_infinite,
        updated.router_model
    );
    Ok(())
}
