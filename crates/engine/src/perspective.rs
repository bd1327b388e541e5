//! Presents a shared transcript from one speaker's point of view.
//!
//! The speaker's own messages become `assistant` turns; everyone else is
//! folded into `user` turns tagged with the sender's name. Tool traffic and
//! system notes are passed through as system context.

use parley_core::agent::Agent;
use parley_core::chat::ChatMessage;
use parley_core::message::{Message, MessageRole};
use std::collections::HashMap;

/// Build the chat request body for `speaker`.
///
/// `agents` is the full roster and only used for sender names and to detect
/// a single-agent session. When a lone agent has no human input, its prior
/// messages are numbered user lines instead of back-to-back assistant turns,
/// which models tend to lose track of.
pub fn format_for_speaker(messages: &[Message], speaker: &Agent, agents: &[Agent]) -> Vec<ChatMessage> {
    let names: HashMap<&str, &str> = agents.iter().map(|a| (a.id.as_str(), a.name.as_str())).collect();
    let numbered = agents.len() == 1 && !messages.iter().any(|m| m.role == MessageRole::Human);

    let mut formatted = Vec::with_capacity(messages.len() + 1);
    formatted.push(ChatMessage::system(&speaker.system_prompt));

    let mut previous = 0usize;
    for msg in messages {
        match msg.role {
            MessageRole::System => formatted.push(ChatMessage::system(&msg.content)),
            MessageRole::ToolCall | MessageRole::ToolResult => {
                let kind = if msg.role == MessageRole::ToolCall { "Tool Call" } else { "Tool Result" };
                let tool = msg.tool_name.as_deref().unwrap_or("unknown");
                formatted.push(ChatMessage::system(format!("[{kind} - {tool}]: {}", msg.content)));
            }
            _ if msg.agent_id.as_deref() == Some(speaker.id.as_str()) => {
                if numbered {
                    previous += 1;
                    formatted.push(ChatMessage::user(format!("[previous_message_{previous}]: {}", msg.content)));
                } else {
                    formatted.push(ChatMessage::assistant(&msg.content));
                }
            }
            MessageRole::Human => formatted.push(ChatMessage::user(format!("[Human]: {}", msg.content))),
            MessageRole::Agent => match msg.agent_id.as_deref().and_then(|id| names.get(id)) {
                Some(name) => formatted.push(ChatMessage::user(format!("[{name}]: {}", msg.content))),
                None => formatted.push(ChatMessage::user(&msg.content)),
            },
        }
    }
    formatted
}
