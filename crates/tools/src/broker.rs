//! In-process approver that waits for an external decision.
//!
//! `decide` parks on a oneshot channel keyed by proposal id; whoever
//! collects the human's answer (a console prompt, an API handler) calls
//! [`ApprovalBroker::resolve`].

use async_trait::async_trait;
use parley_core::approval::Approver;
use parley_core::capability::{ApprovalDecision, CapabilityProposal};
use parley_core::error::ApprovalError;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

#[derive(Default)]
pub struct ApprovalBroker {
    waiters: Mutex<HashMap<String, oneshot::Sender<ApprovalDecision>>>,
}

impl ApprovalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn waiters(&self) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<ApprovalDecision>>> {
        self.waiters.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver a decision. Returns `false` when nothing is waiting on
    /// `proposal_id`; the caller should settle it directly instead.
    pub fn resolve(&self, proposal_id: &str, decision: ApprovalDecision) -> bool {
        let Some(tx) = self.waiters().remove(proposal_id) else {
            return false;
        };
        tx.send(decision).is_ok()
    }

    /// Proposal ids with a live waiter.
    pub fn waiting(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .waiters()
            .iter()
            .filter(|(_, tx)| !tx.is_closed())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl Approver for ApprovalBroker {
    async fn decide(&self, proposal: &CapabilityProposal) -> Result<ApprovalDecision, ApprovalError> {
        let rx = {
            let mut waiters = self.waiters();
            if waiters.get(&proposal.id).is_some_and(|tx| !tx.is_closed()) {
                return Err(ApprovalError::AlreadyPending(proposal.id.clone()));
            }
            let (tx, rx) = oneshot::channel();
            waiters.insert(proposal.id.clone(), tx);
            rx
        };
        debug!(proposal_id = %proposal.id, "Waiting for approval decision");
        rx.await.map_err(|_| ApprovalError::ChannelClosed(proposal.id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn proposal() -> CapabilityProposal {
        CapabilityProposal::pending("s", "a", "t", "d", json!({}), "echo", None)
    }

    #[tokio::test]
    async fn resolve_wakes_the_waiter() {
        let broker = Arc::new(ApprovalBroker::new());
        let p = proposal();
        let id = p.id.clone();

        let waiter = {
            let broker = broker.clone();
            tokio::spawn(async move { broker.decide(&p).await })
        };
        while broker.waiting().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert_eq!(broker.waiting(), vec![id.clone()]);
        assert!(broker.resolve(&id, ApprovalDecision::Approve));
        assert_eq!(waiter.await.unwrap().unwrap(), ApprovalDecision::Approve);
        assert!(broker.waiting().is_empty());
    }

    #[tokio::test]
    async fn resolve_without_waiter_is_false() {
        let broker = ApprovalBroker::new();
        assert!(!broker.resolve("missing", ApprovalDecision::Reject));
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_block_a_retry() {
        let broker = Arc::new(ApprovalBroker::new());
        let p = proposal();

        let first = {
            let broker = broker.clone();
            let p = p.clone();
            tokio::spawn(async move { broker.decide(&p).await })
        };
        while broker.waiting().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        first.abort();
        let _ = first.await;

        assert!(broker.waiting().is_empty());
        let second = {
            let broker = broker.clone();
            let p = p.clone();
            tokio::spawn(async move { broker.decide(&p).await })
        };
        while broker.waiting().is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(broker.resolve(&p.id, ApprovalDecision::Reject));
        assert_eq!(second.await.unwrap().unwrap(), ApprovalDecision::Reject);
    }
}
