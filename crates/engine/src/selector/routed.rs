//! Model-routed turns: direct address, candidate filtering, the routing
//! prompt, and reply matching.

use parley_config::RoutingConfig;
use parley_core::agent::Agent;
use parley_core::chat::ChatMessage;
use parley_core::message::{Message, MessageRole};
use std::collections::HashMap;

/// Whether `phrase` occurs in `text` at word boundaries.
///
/// A boundary is only required on a side where the phrase itself begins or
/// ends with a word character, so `@bob` matches "ask @bob" and "(@bob)".
fn contains_phrase(text: &str, phrase: &str) -> bool {
    let is_word = |c: char| c.is_alphanumeric() || c == '_';
    let needs_left = phrase.chars().next().is_some_and(is_word);
    let needs_right = phrase.chars().next_back().is_some_and(is_word);

    text.match_indices(phrase).any(|(start, _)| {
        let end = start + phrase.len();
        let left_ok = !needs_left || text[..start].chars().next_back().is_none_or(|c| !is_word(c));
        let right_ok = !needs_right || text[end..].chars().next().is_none_or(|c| !is_word(c));
        left_ok && right_ok
    })
}

/// Whether `content` addresses `name` directly: `@name`, `hey name`,
/// `name,` or `name:`.
pub fn addresses(content: &str, name: &str) -> bool {
    let content = content.to_lowercase();
    let name = name.trim().to_lowercase();
    if name.is_empty() {
        return false;
    }
    [
        format!("@{name}"),
        format!("hey {name}"),
        format!("{name},"),
        format!("{name}:"),
    ]
    .iter()
    .any(|phrase| contains_phrase(&content, phrase))
}

/// The agent named in the latest Human or Agent message, if any, ignoring
/// the message's own author.
pub fn directly_addressed<'a>(agents: &'a [Agent], recent: &[Message]) -> Option<&'a Agent> {
    let latest = recent.iter().rev().find(|m| m.role.is_conversational())?;
    agents
        .iter()
        .find(|a| latest.agent_id.as_deref() != Some(a.id.as_str()) && addresses(&latest.content, &a.name))
}

/// The id of the most recent Agent-role speaker.
pub fn last_speaker(recent: &[Message]) -> Option<&str> {
    recent
        .iter()
        .rev()
        .find(|m| m.role == MessageRole::Agent)
        .and_then(|m| m.agent_id.as_deref())
}

/// Agent-role messages per agent id.
pub fn turn_counts(recent: &[Message]) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for m in recent.iter().filter(|m| m.role == MessageRole::Agent) {
        if let Some(id) = m.agent_id.as_deref() {
            *counts.entry(id).or_insert(0) += 1;
        }
    }
    counts
}

/// The candidate with the fewest turns; ties go to the earlier candidate.
pub fn least_turns<'a>(candidates: &[&'a Agent], counts: &HashMap<&str, usize>) -> Option<&'a Agent> {
    candidates
        .iter()
        .copied()
        .enumerate()
        .min_by_key(|(i, a)| (counts.get(a.id.as_str()).copied().unwrap_or(0), *i))
        .map(|(_, a)| a)
}

/// Match the router's reply to a candidate: exact, then case-insensitive,
/// then by containment.
pub fn match_reply<'a>(reply: &str, candidates: &[&'a Agent]) -> Option<&'a Agent> {
    let cleaned = reply
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim();
    if cleaned.is_empty() {
        return None;
    }
    let lowered = cleaned.to_lowercase();

    candidates
        .iter()
        .find(|a| a.name == cleaned)
        .or_else(|| candidates.iter().find(|a| a.name.to_lowercase() == lowered))
        .or_else(|| candidates.iter().find(|a| lowered.contains(&a.name.to_lowercase())))
        .copied()
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// The routing request messages: a system brief and the transcript tail.
pub fn routing_prompt(
    candidates: &[&Agent],
    agents: &[Agent],
    recent: &[Message],
    config: &RoutingConfig,
) -> Vec<ChatMessage> {
    let profiles = candidates
        .iter()
        .map(|a| {
            let persona = truncate(&a.system_prompt, config.persona_chars);
            if a.capabilities.is_empty() {
                format!("- \"{}\": {}", a.name, persona)
            } else {
                format!("- \"{}\": {}\n  Tools: {}", a.name, persona, a.capabilities.join(", "))
            }
        })
        .collect::<Vec<_>>()
        .join("\n");

    let names: HashMap<&str, &str> = agents.iter().map(|a| (a.id.as_str(), a.name.as_str())).collect();
    let counts = turn_counts(recent);
    let count_line = {
        let mut parts: Vec<String> = agents
            .iter()
            .filter_map(|a| counts.get(a.id.as_str()).map(|c| format!("{}: {c}", a.name)))
            .collect();
        if parts.is_empty() {
            parts.push("none yet".into());
        }
        parts.join(", ")
    };
    let options = candidates
        .iter()
        .map(|a| format!("\"{}\"", a.name))
        .collect::<Vec<_>>()
        .join(", ");

    let conversational: Vec<&Message> = recent.iter().filter(|m| m.role.is_conversational()).collect();
    let skip = conversational.len().saturating_sub(config.transcript_messages);
    let transcript = conversational[skip..]
        .iter()
        .map(|m| {
            let sender = match m.role {
                MessageRole::Human => "Human",
                _ => m
                    .agent_id
                    .as_deref()
                    .and_then(|id| names.get(id).copied())
                    .unwrap_or("Unknown"),
            };
            format!("[{sender}]: {}", truncate(&m.content, config.message_chars))
        })
        .collect::<Vec<_>>()
        .join("\n");

    let brief = format!(
        "You route a multi-agent conversation. Pick which agent speaks next.\n\n\
         ELIGIBLE AGENTS (the last speaker has already been excluded):\n{profiles}\n\n\
         ROUTING RULES (in priority order):\n\
         1. DIRECT ADDRESS: if the last message explicitly names or addresses an agent, that agent speaks next.\n\
         2. QUESTION DIRECTED: if an agent was asked a question or given a request, let them reply.\n\
         3. RELEVANCE: pick the agent whose expertise or tools fit the current topic best.\n\
         4. TIE-BREAK: among equal candidates, pick the one with the fewest turns.\n\n\
         Turn counts so far (for context only): {count_line}\n\n\
         Reply with ONLY one of: {options}"
    );

    let transcript = if transcript.is_empty() {
        "The conversation is just starting.".to_string()
    } else {
        transcript
    };

    vec![ChatMessage::system(brief), ChatMessage::user(transcript)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{agent, agent_msg, human_msg};

    #[test]
    fn address_forms() {
        assert!(addresses("@bob what do you think?", "Bob"));
        assert!(addresses("Hey Bob, thoughts?", "bob"));
        assert!(addresses("Bob, over to you", "Bob"));
        assert!(addresses("Question for Bob: why?", "Bob"));
        assert!(!addresses("Bobby, hi", "Bob"));
        assert!(!addresses("I agree with bob", "Bob"));
        assert!(!addresses("hey bobcat", "Bob"));
    }

    #[test]
    fn direct_address_ignores_author() {
        let alice = agent("Alice", 0);
        let bob = agent("Bob", 1);
        let agents = vec![alice.clone(), bob.clone()];

        let recent = vec![agent_msg(1, &bob, "Bob: talking to myself")];
        assert!(directly_addressed(&agents, &recent).is_none());

        let recent = vec![agent_msg(1, &alice, "what now, @bob?")];
        assert_eq!(directly_addressed(&agents, &recent).unwrap().name, "Bob");
    }

    #[test]
    fn tool_traffic_is_skipped_for_address() {
        let alice = agent("Alice", 0);
        let bob = agent("Bob", 1);
        let agents = vec![alice.clone(), bob.clone()];
        let mut tool = agent_msg(2, &alice, "{}");
        tool.role = MessageRole::ToolResult;
        let recent = vec![human_msg(1, "hey alice, please check"), tool];
        assert_eq!(directly_addressed(&agents, &recent).unwrap().name, "Alice");
    }

    #[test]
    fn reply_matching_order() {
        let alice = agent("Alice", 0);
        let al = agent("Al", 1);
        let candidates = vec![&alice, &al];
        assert_eq!(match_reply("\"Al\"", &candidates).unwrap().name, "Al");
        assert_eq!(match_reply("alice", &candidates).unwrap().name, "Alice");
        assert_eq!(match_reply("I pick Alice.", &candidates).unwrap().name, "Alice");
        assert!(match_reply("nobody", &candidates).is_none());
        assert!(match_reply("  ", &candidates).is_none());
    }

    #[test]
    fn least_turns_breaks_ties_by_order() {
        let a = agent("A", 0);
        let b = agent("B", 1);
        let c = agent("C", 2);
        let recent = vec![agent_msg(1, &a, "x"), agent_msg(2, &c, "y"), agent_msg(3, &a, "z")];
        let counts = turn_counts(&recent);
        assert_eq!(least_turns(&[&a, &b, &c], &counts).unwrap().name, "B");
        assert_eq!(least_turns(&[&a, &c], &counts).unwrap().name, "C");
    }

    #[test]
    fn prompt_truncates_personas_and_transcript() {
        let mut a = agent("A", 0);
        a.system_prompt = "p".repeat(900);
        a.capabilities = vec!["calculator".into()];
        let b = agent("B", 1);
        let agents = vec![a.clone(), b.clone()];
        let recent: Vec<Message> = (0..30).map(|i| agent_msg(i, &b, &"w".repeat(600))).collect();

        let prompt = routing_prompt(&[&a, &b], &agents, &recent, &RoutingConfig::default());
        assert_eq!(prompt.len(), 2);
        assert!(prompt[0].content.contains(&"p".repeat(500)));
        assert!(!prompt[0].content.contains(&"p".repeat(501)));
        assert!(prompt[0].content.contains("Tools: calculator"));
        assert!(prompt[0].content.contains("B: 30"));

        let lines: Vec<&str> = prompt[1].content.lines().collect();
        assert_eq!(lines.len(), 20);
        assert_eq!(lines[0], format!("[B]: {}", "w".repeat(400)));
    }
}
