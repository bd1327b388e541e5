//! Parley CLI: the main entry point.
//!
//! Commands:
//! - `init`      : Write a default config file
//! - `doctor`    : Check configuration and storage
//! - `session`   : Create, list, inspect and configure sessions
//! - `agent`     : Add agents, grant capabilities, manage agent templates
//! - `say`       : Post a human message into a session
//! - `run`       : Run turns (bounded or until Ctrl+C)
//! - `approvals` : List and decide capability proposals
//! - `tools`     : List and remove capabilities

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

mod commands;
mod console;
mod runtime;

#[derive(Parser)]
#[command(
    name = "parley",
    about = "Parley: multi-agent conversations with tools",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of ~/.parley/config.toml
    #[arg(short, long, global = true, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init,

    /// Check configuration and storage
    Doctor,

    /// Manage sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentAction,
    },

    /// Post a human message into a session
    Say {
        session: String,
        message: String,
    },

    /// Run conversation turns
    Run {
        session: String,

        /// Number of turns to run
        #[arg(short = 'n', long, default_value_t = 1)]
        turns: usize,

        /// First speaker (agent name or id) for directed sessions
        #[arg(short, long)]
        target: Option<String>,

        /// Run until Ctrl+C, a rest request, or a failure
        #[arg(long)]
        infinite: bool,

        /// How capability proposals are decided during the run
        #[arg(long, value_enum, default_value_t = ApprovalMode::Ask)]
        approvals: ApprovalMode,
    },

    /// Capability proposals
    Approvals {
        #[command(subcommand)]
        action: ApprovalAction,
    },

    /// Installed capabilities
    Tools {
        #[command(subcommand)]
        action: ToolAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Create a session
    Create {
        name: String,

        #[arg(long, default_value = "fixed_rotation")]
        order: String,

        #[arg(long, default_value = "window")]
        memory: String,

        #[arg(long)]
        window: Option<usize>,

        #[arg(long)]
        router_model: Option<String>,

        #[arg(long)]
        slow: bool,

        #[arg(long)]
        infinite: bool,
    },

    /// List sessions
    List,

    /// Show a session, its agents and transcript
    Show {
        session: String,

        /// Only the last N messages
        #[arg(short, long)]
        last: Option<usize>,
    },

    /// Change settings between runs
    Set {
        session: String,

        #[arg(long)]
        order: Option<String>,

        #[arg(long)]
        memory: Option<String>,

        #[arg(long)]
        window: Option<usize>,

        #[arg(long)]
        router_model: Option<String>,

        #[arg(long)]
        slow: Option<bool>,

        #[arg(long)]
        infinite: Option<bool>,
    },
}

#[derive(Subcommand)]
enum AgentAction {
    /// Add an agent to a session
    Add {
        session: String,
        name: String,

        /// Model identifier (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,

        /// System prompt
        #[arg(short, long, conflicts_with = "prompt_file")]
        prompt: Option<String>,

        /// Read the system prompt from a file
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Capabilities to grant, comma separated
        #[arg(long, value_delimiter = ',')]
        tools: Vec<String>,
    },

    /// Grant an installed capability to an agent
    Grant { agent: String, capability: String },

    /// Saved agent presets
    Template {
        #[command(subcommand)]
        action: TemplateAction,
    },
}

#[derive(Subcommand)]
enum TemplateAction {
    /// Save a template, replacing one with the same name
    Save {
        name: String,

        /// Model identifier (defaults to the configured model)
        #[arg(short, long)]
        model: Option<String>,

        /// System prompt
        #[arg(short, long, conflicts_with = "prompt_file", required_unless_present = "prompt_file")]
        prompt: Option<String>,

        /// Read the system prompt from a file
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Capabilities to grant, comma separated
        #[arg(long, value_delimiter = ',')]
        tools: Vec<String>,
    },

    /// List templates
    List,

    /// Add an agent built from a template to a session
    Use {
        template: String,
        session: String,

        /// Agent name (defaults to the template name)
        #[arg(long)]
        name: Option<String>,
    },

    /// Delete a template
    Remove { name: String },
}

#[derive(Subcommand)]
enum ApprovalAction {
    /// List proposals (pending only unless --all)
    List {
        #[arg(long)]
        all: bool,
    },

    /// Approve or reject a proposal no run is waiting on
    Resolve {
        proposal: String,

        #[arg(value_enum)]
        decision: Decision,
    },
}

#[derive(Subcommand)]
enum ToolAction {
    /// List installed capabilities
    List,

    /// Show a capability's schema and code
    Show { name: String },

    /// Remove a user capability
    Remove { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
pub enum ApprovalMode {
    /// Prompt on the console
    Ask,
    /// Approve every proposal
    Approve,
    /// Reject every proposal
    Reject,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Decision {
    Approve,
    Reject,
}

fn read_prompt(prompt: Option<String>, prompt_file: Option<PathBuf>, fallback: impl FnOnce() -> String) -> Result<String, String> {
    match (prompt, prompt_file) {
        (Some(p), _) => Ok(p),
        (None, Some(path)) => std::fs::read_to_string(&path).map_err(|e| format!("Cannot read {}: {e}", path.display())),
        (None, None) => Ok(fallback()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config;
    match cli.command {
        Commands::Init => commands::init::run(config_path).await?,
        Commands::Doctor => commands::doctor::run(config_path).await?,
        Commands::Session { action } => {
            let rt = runtime::Runtime::open(config_path.as_deref()).await?;
            match action {
                SessionAction::Create {
                    name,
                    order,
                    memory,
                    window,
                    router_model,
                    slow,
                    infinite,
                } => {
                    let opts = commands::session::CreateOptions {
                        name,
                        order,
                        memory,
                        window,
                        router_model,
                        slow,
                        infinite,
                    };
                    commands::session::create(&rt, opts).await?
                }
                SessionAction::List => commands::session::list(&rt).await?,
                SessionAction::Show { session, last } => commands::session::show(&rt, &session, last).await?,
                SessionAction::Set {
                    session,
                    order,
                    memory,
                    window,
                    router_model,
                    slow,
                    infinite,
                } => {
                    let opts = commands::session::SetOptions {
                        order,
                        memory,
                        window,
                        router_model,
                        slow,
                        infinite,
                    };
                    commands::session::set(&rt, &session, opts).await?
                }
            }
        }
        Commands::Agent { action } => {
            let rt = runtime::Runtime::open(config_path.as_deref()).await?;
            match action {
                AgentAction::Add {
                    session,
                    name,
                    model,
                    prompt,
                    prompt_file,
                    tools,
                } => {
                    let prompt = read_prompt(prompt, prompt_file, || format!("You are {name}."))?;
                    commands::agent::add(&rt, &session, &name, model, &prompt, tools).await?
                }
                AgentAction::Grant { agent, capability } => commands::agent::grant(&rt, &agent, &capability).await?,
                AgentAction::Template { action } => match action {
                    TemplateAction::Save {
                        name,
                        model,
                        prompt,
                        prompt_file,
                        tools,
                    } => {
                        let prompt = read_prompt(prompt, prompt_file, String::new)?;
                        commands::agent::save_template(&rt, &name, model, &prompt, tools).await?
                    }
                    TemplateAction::List => commands::agent::list_templates(&rt).await?,
                    TemplateAction::Use { template, session, name } => {
                        commands::agent::add_from_template(&rt, &session, &template, name.as_deref()).await?;
                    }
                    TemplateAction::Remove { name } => commands::agent::remove_template(&rt, &name).await?,
                },
            }
        }
        Commands::Say { session, message } => {
            let rt = runtime::Runtime::open(config_path.as_deref()).await?;
            commands::say::run(&rt, &session, &message).await?
        }
        Commands::Run {
            session,
            turns,
            target,
            infinite,
            approvals,
        } => {
            let rt = runtime::Runtime::open(config_path.as_deref()).await?;
            let opts = commands::run::RunOptions {
                turns,
                target,
                infinite,
                approvals,
            };
            commands::run::run(&rt, &session, opts).await?
        }
        Commands::Approvals { action } => {
            let rt = runtime::Runtime::open(config_path.as_deref()).await?;
            match action {
                ApprovalAction::List { all } => commands::approvals::list(&rt, all).await?,
                ApprovalAction::Resolve { proposal, decision } => {
                    commands::approvals::resolve(&rt, &proposal, decision).await?
                }
            }
        }
        Commands::Tools { action } => {
            let rt = runtime::Runtime::open(config_path.as_deref()).await?;
            match action {
                ToolAction::List => commands::tools::list(&rt).await?,
                ToolAction::Show { name } => commands::tools::show(&rt, &name).await?,
                ToolAction::Remove { name } => commands::tools::remove(&rt, &name).await?,
            }
        }
    }

    Ok(())
}
