//! Summary requests and the synthetic summary message.

use parley_core::agent::Agent;
use parley_core::chat::ChatMessage;
use parley_core::message::{Message, MessageRole};
use std::collections::HashMap;

const INSTRUCTION: &str = "You are a conversation summarizer. Provide a concise summary of the \
following conversation, capturing the key points, decisions, open questions and the positions \
each participant has taken. Keep it under 500 words.";

pub const EMPTY_SUMMARY: &str = "Unable to generate summary.";

/// Render messages as `speaker: content` lines.
pub fn transcript(messages: &[Message], agents: &[Agent]) -> String {
    let names: HashMap<&str, &str> = agents.iter().map(|a| (a.id.as_str(), a.name.as_str())).collect();
    messages
        .iter()
        .map(|m| {
            let speaker = match m.role {
                MessageRole::Human => "Human",
                MessageRole::System => "System",
                _ => m
                    .agent_id
                    .as_deref()
                    .and_then(|id| names.get(id).copied())
                    .unwrap_or("Unknown"),
            };
            format!("{speaker}: {}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// The summary request messages.
pub fn request_messages(messages: &[Message], agents: &[Agent]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(INSTRUCTION),
        ChatMessage::user(format!("Summarize this conversation:\n\n{}", transcript(messages, agents))),
    ]
}

/// The body of the synthetic summary message.
pub fn header(summaries: &str, summarized_tokens: Option<usize>) -> String {
    match summarized_tokens {
        Some(tokens) => format!("[Conversation Summary ({tokens} tokens summarized)]\n{summaries}"),
        None => format!("[Conversation Summary]\n{summaries}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{agent, agent_msg, human_msg};

    #[test]
    fn transcript_names_speakers() {
        let alice = agent("Alice", 0);
        let mut sys = human_msg(3, "note");
        sys.role = MessageRole::System;
        let mut stray = agent_msg(4, &alice, "who?");
        stray.agent_id = Some("gone".into());

        let text = transcript(
            &[human_msg(1, "hi"), agent_msg(2, &alice, "hello"), sys, stray],
            &[alice],
        );
        assert_eq!(text, "Human: hi\nAlice: hello\nSystem: note\nUnknown: who?");
    }

    #[test]
    fn request_shape() {
        let msgs = request_messages(&[human_msg(1, "hi")], &[]);
        assert_eq!(msgs.len(), 2);
        assert!(msgs[0].content.contains("under 500 words"));
        assert_eq!(msgs[1].content, "Summarize this conversation:\n\nHuman: hi");
    }

    #[test]
    fn header_variants() {
        assert_eq!(header("s", None), "[Conversation Summary]\ns");
        assert_eq!(header("s", Some(120)), "[Conversation Summary (120 tokens summarized)]\ns");
    }
}
