//! Fixed rotation: agents take turns in `order_index` order.

use parley_core::agent::Agent;

/// The agent whose turn `turn_index` is. `agents` must be sorted.
pub fn pick(agents: &[Agent], turn_index: u64) -> Option<&Agent> {
    if agents.is_empty() {
        return None;
    }
    let slot = (turn_index % agents.len() as u64) as usize;
    agents.get(slot)
}
