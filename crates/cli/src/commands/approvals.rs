//! `parley approvals`: list and decide capability proposals.

use crate::Decision;
use crate::runtime::Runtime;
use parley_core::approval::FixedApprover;
use parley_core::capability::{ApprovalDecision, ProposalStatus};
use std::sync::Arc;

pub async fn list(rt: &Runtime, all: bool) -> Result<(), Box<dyn std::error::Error>> {
    let filter = if all { None } else { Some(ProposalStatus::Pending) };
    let proposals = rt.repo.list_proposals(filter).await?;
    if proposals.is_empty() {
        println!("No proposals.");
        return Ok(());
    }
    for p in proposals {
        println!("{} {:<9} {}: {}", p.id, p.status.as_str(), p.name, p.description);
        println!("    session {} · agent {} · {}", p.session_id, p.agent_id, p.created_at.format("%Y-%m-%d %H:%M"));
    }
    Ok(())
}

pub async fn resolve(rt: &Runtime, proposal: &str, decision: Decision) -> Result<(), Box<dyn std::error::Error>> {
    let decision = match decision {
        Decision::Approve => ApprovalDecision::Approve,
        Decision::Reject => ApprovalDecision::Reject,
    };
    let gate = rt.gate(Arc::new(FixedApprover(decision)));
    let outcome = gate.settle_detached(proposal, decision).await?;
    println!("{}", outcome.system_note());
    Ok(())
}
