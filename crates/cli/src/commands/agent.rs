//! `parley agent`: add agents, grant capabilities and manage templates.

use crate::runtime::Runtime;
use parley_core::agent::{Agent, NewAgent};
use parley_core::template::NewAgentTemplate;

async fn ensure_capabilities(rt: &Runtime, tools: &[String]) -> Result<(), Box<dyn std::error::Error>> {
    for tool in tools {
        if rt.repo.get_capability(tool).await?.is_none() {
            return Err(format!("Unknown capability '{tool}' (see `parley tools list`)").into());
        }
    }
    Ok(())
}

fn print_added(agent: &Agent, session_name: &str) {
    println!(
        "✅ Added {} to '{}' ({}, position {})",
        agent.name, session_name, agent.id, agent.order_index
    );
    if !agent.capabilities.is_empty() {
        println!("   Tools: {}", agent.capabilities.join(", "));
    }
}

pub async fn add(
    rt: &Runtime,
    session: &str,
    name: &str,
    model: Option<String>,
    prompt: &str,
    tools: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let session = rt.find_session(session).await?;
    ensure_capabilities(rt, &tools).await?;

    let model = model.unwrap_or_else(|| rt.config.default_model.clone());
    let new = NewAgent::new(name, model, prompt).with_capabilities(tools);
    let agent = rt.repo.create_agent(&session.id, new).await?;
    print_added(&agent, &session.name);
    Ok(())
}

pub async fn grant(rt: &Runtime, agent: &str, capability: &str) -> Result<(), Box<dyn std::error::Error>> {
    if rt.repo.get_capability(capability).await?.is_none() {
        return Err(format!("Unknown capability '{capability}'").into());
    }
    let Some(found) = rt.repo.get_agent(agent).await? else {
        return Err(format!("No agent with id '{agent}'").into());
    };
    rt.repo.grant_capability(&found.id, capability).await?;
    println!("✅ {} may now use {capability}", found.name);
    Ok(())
}

/// Save a preset, replacing any template with the same name.
pub async fn save_template(
    rt: &Runtime,
    name: &str,
    model: Option<String>,
    prompt: &str,
    tools: Vec<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    ensure_capabilities(rt, &tools).await?;
    let model = model.unwrap_or_else(|| rt.config.default_model.clone());
    let template = rt
        .repo
        .upsert_template(NewAgentTemplate::new(name, model, prompt).with_tools(tools))
        .await?;
    println!("✅ Saved template '{}' ({})", template.name, template.model);
    Ok(())
}

pub async fn list_templates(rt: &Runtime) -> Result<(), Box<dyn std::error::Error>> {
    let templates = rt.repo.list_templates().await?;
    if templates.is_empty() {
        println!("No templates. Save one with `parley agent template save`.");
        return Ok(());
    }
    for t in templates {
        let tools = if t.tool_ids.is_empty() { "-".to_string() } else { t.tool_ids.join(", ") };
        println!("{:<20} {:<32} tools: {tools}", t.name, t.model);
    }
    Ok(())
}

/// Add an agent built from a template. `name` overrides the template name.
pub async fn add_from_template(
    rt: &Runtime,
    session: &str,
    template: &str,
    name: Option<&str>,
) -> Result<Agent, Box<dyn std::error::Error>> {
    let session = rt.find_session(session).await?;
    let Some(template) = rt.repo.get_template(template).await? else {
        return Err(format!("No template named '{template}' (see `parley agent template list`)").into());
    };
    // A tool removed since the template was saved is skipped, not fatal.
    let mut new = template.to_new_agent(name);
    let mut granted = Vec::with_capacity(new.capabilities.len());
    for tool in new.capabilities.drain(..) {
        if rt.repo.get_capability(&tool).await?.is_some() {
            granted.push(tool);
        } else {
            println!("⚠️  Skipping missing capability '{tool}'");
        }
    }
    new.capabilities = granted;

    let agent = rt.repo.create_agent(&session.id, new).await?;
    print_added(&agent, &session.name);
    Ok(agent)
}

pub async fn remove_template(rt: &Runtime, name: &str) -> Result<(), Box<dyn std::error::Error>> {
    if rt.repo.delete_template(name).await? {
        println!("🗑️  Removed template '{name}'");
        Ok(())
    } else {
        Err(format!("No template named '{name}'").into())
    }
}
