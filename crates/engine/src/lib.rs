//! The conversation engine: who speaks next, what they remember, and how
//! their tool calls are carried out.
//!
//! One [`ConversationEngine`] drives one session. Each turn:
//!
//! 1. **Select** a speaker ([`selector`])
//! 2. **Compact** the transcript into a bounded context ([`compaction`])
//! 3. **Format** it from the speaker's point of view ([`perspective`])
//! 4. **Run** the tool-call loop against the model ([`tool_loop`])
//! 5. **Persist** the reply and advance the turn counter
//!
//! Runs stop on cancellation, on a rest request, or on the first failure
//! that cannot be absorbed.

pub mod compaction;
pub mod engine;
pub mod error;
pub mod perspective;
pub mod selector;
pub mod token;
pub mod tool_loop;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use compaction::MemoryCompactor;
pub use engine::{ConversationEngine, RunOutcome, StopReason};
pub use error::{EngineError, TurnError};
pub use selector::TurnSelector;
pub use tool_loop::ToolLoop;
