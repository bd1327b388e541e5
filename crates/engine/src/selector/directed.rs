//! Directed turns: the caller names who speaks.

use parley_core::agent::Agent;

/// Resolve `target` as an agent id, or failing that a case-insensitive name.
pub fn resolve<'a>(agents: &'a [Agent], target: &str) -> Option<&'a Agent> {
    let target = target.trim();
    agents
        .iter()
        .find(|a| a.id == target)
        .or_else(|| agents.iter().find(|a| a.name.eq_ignore_ascii_case(target)))
}
