//! # Parley Core
//!
//! Domain types, traits, and error definitions for the Parley multi-agent
//! conversation engine. Every collaborator the engine talks to (completion
//! endpoint, repository, approver, capabilities) is defined as a trait here;
//! implementations live in their respective crates.

pub mod error;
pub mod chat;
pub mod provider;
pub mod session;
pub mod agent;
pub mod message;
pub mod capability;
pub mod checkpoint;
pub mod repository;
pub mod tool;
pub mod approval;
pub mod event;
pub mod template;

// Re-export key types at crate root for ergonomics
pub use error::{ApprovalError, Error, ProviderError, Result, StoreError, ToolError};
pub use chat::{ChatMessage, ChatRole, MessageToolCall};
pub use provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, Usage};
pub use session::{MemoryStrategy, NewSession, Session, SessionSettings, SessionStatus, TurnCommit, TurnOrder};
pub use agent::{Agent, AgentUpdate, NewAgent};
pub use message::{Message, MessageRole, NewMessage};
pub use capability::{ApprovalDecision, Capability, CapabilityProposal, NewCapability, ProposalStatus};
pub use checkpoint::SummaryCheckpoint;
pub use repository::Repository;
pub use tool::{RestSignal, Tool, ToolCall, ToolContext, ToolRegistry};
pub use approval::{Approver, FixedApprover};
pub use event::{ConversationEvent, EventBus};
pub use template::{AgentTemplate, NewAgentTemplate};
