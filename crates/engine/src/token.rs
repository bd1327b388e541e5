//! Token estimation.
//!
//! Character heuristic: ~4 characters per token, plus a fixed overhead per
//! message for role and delimiters.

use parley_core::message::Message;

const MESSAGE_OVERHEAD: usize = 4;

/// Estimate the token count for a string. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

pub fn estimate_message_tokens(message: &Message) -> usize {
    MESSAGE_OVERHEAD + estimate_tokens(&message.content)
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}
