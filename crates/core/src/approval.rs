//! Approver trait: the human-in-the-loop decision point.
//!
//! The registration gate raises a proposal and then waits on an approver.
//! How the decision is obtained (a console prompt, an HTTP callback, a test
//! double) is the implementation's concern.

use async_trait::async_trait;
use crate::capability::{ApprovalDecision, CapabilityProposal};
use crate::error::ApprovalError;

#[async_trait]
pub trait Approver: Send + Sync {
    /// Wait for a decision on `proposal`.
    ///
    /// Implementations may block for as long as a human needs; callers race
    /// this future against cancellation.
    async fn decide(&self, proposal: &CapabilityProposal) -> Result<ApprovalDecision, ApprovalError>;
}

/// An approver that always returns the same decision.
#[derive(Debug, Clone, Copy)]
pub struct FixedApprover(pub ApprovalDecision);

#[async_trait]
impl Approver for FixedApprover {
    async fn decide(&self, _proposal: &CapabilityProposal) -> Result<ApprovalDecision, ApprovalError> {
        Ok(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fixed_approver_returns_its_decision() {
        let proposal = CapabilityProposal::pending(
            "s", "a", "t", "d", serde_json::json!({}), "echo", None,
        );
        let approver = FixedApprover(ApprovalDecision::Reject);
        assert_eq!(approver.decide(&proposal).await.unwrap(), ApprovalDecision::Reject);
    }
}
