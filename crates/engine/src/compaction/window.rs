//! Sliding-window compaction.

use parley_core::message::Message;

/// The last `window_size` messages, or all of them when they fit.
pub fn apply(history: Vec<Message>, window_size: usize) -> Vec<Message> {
    if history.len() <= window_size {
        return history;
    }
    let skip = history.len() - window_size;
    history.into_iter().skip(skip).collect()
}
