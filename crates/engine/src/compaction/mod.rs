//! Memory compaction: bounding what a speaker sees.
//!
//! - **Window** keeps the newest `window_size` messages.
//! - **Summarize** folds older messages into persisted checkpoints and
//!   presents them as one synthetic System message ahead of a recent tail.
//!
//! Summarization is best-effort. A failed summary call degrades to the
//! tail alone and is never surfaced to the run.

pub mod summarize;
pub mod window;

use crate::token::estimate_messages_tokens;
use parley_config::MemoryConfig;
use parley_core::agent::Agent;
use parley_core::checkpoint::{self, SummaryCheckpoint};
use parley_core::error::StoreError;
use parley_core::message::Message;
use parley_core::provider::{Provider, ProviderRequest};
use parley_core::repository::Repository;
use parley_core::session::{MemoryStrategy, Session};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct MemoryCompactor {
    repo: Arc<dyn Repository>,
    provider: Arc<dyn Provider>,
    config: MemoryConfig,
}

impl MemoryCompactor {
    pub fn new(repo: Arc<dyn Repository>, provider: Arc<dyn Provider>, config: MemoryConfig) -> Self {
        Self { repo, provider, config }
    }

    /// Reduce `history` (in transcript order) to the context for one turn.
    pub async fn build_context(
        &self,
        session: &Session,
        agents: &[Agent],
        history: Vec<Message>,
    ) -> Result<Vec<Message>, StoreError> {
        match session.memory_strategy {
            MemoryStrategy::Window => Ok(window::apply(history, session.window_size)),
            MemoryStrategy::Summarize => self.summarize(session, agents, history).await,
        }
    }

    async fn summarize(
        &self,
        session: &Session,
        agents: &[Agent],
        history: Vec<Message>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut checkpoints = self.repo.list_checkpoints(&session.id).await?;
        let covered_until = checkpoints.iter().map(SummaryCheckpoint::end_key).max();
        let uncovered: Vec<Message> = match covered_until {
            Some(end) => history.into_iter().filter(|m| m.order_key() > end).collect(),
            None => history,
        };

        if uncovered.len() <= self.config.summarize_threshold {
            if checkpoints.is_empty() {
                return Ok(uncovered);
            }
            let synthetic = Message::synthetic_system(
                &session.id,
                summarize::header(&checkpoint::concatenate(&checkpoints), None),
            );
            let mut context = Vec::with_capacity(uncovered.len() + 1);
            context.push(synthetic);
            context.extend(uncovered);
            return Ok(context);
        }

        let split = uncovered.len().saturating_sub(self.config.keep_recent);
        let mut older = uncovered;
        let tail = older.split_off(split);

        let summary = match self.request_summary(&older, agents).await {
            Ok(summary) => summary,
            Err(reason) => {
                warn!(session_id = %session.id, error = %reason, "Summarization failed; keeping recent messages only");
                return Ok(tail);
            }
        };

        let Some(new_checkpoint) = SummaryCheckpoint::covering(&session.id, summary, &older) else {
            return Ok(tail);
        };
        if let Err(e) = self.repo.create_checkpoint(new_checkpoint.clone()).await {
            warn!(session_id = %session.id, error = %e, "Could not persist summary checkpoint; keeping recent messages only");
            return Ok(tail);
        }
        info!(
            session_id = %session.id,
            summarized = older.len(),
            kept = tail.len(),
            "Created summary checkpoint"
        );
        checkpoints.push(new_checkpoint);

        let synthetic = Message::synthetic_system(
            &session.id,
            summarize::header(
                &checkpoint::concatenate(&checkpoints),
                Some(estimate_messages_tokens(&older)),
            ),
        );
        let mut context = Vec::with_capacity(tail.len() + 1);
        context.push(synthetic);
        context.extend(tail);
        Ok(context)
    }

    async fn request_summary(&self, messages: &[Message], agents: &[Agent]) -> Result<String, String> {
        let start = Instant::now();
        let request = ProviderRequest::new(&self.config.summary_model, summarize::request_messages(messages, agents))
            .with_max_tokens(self.config.summary_max_tokens);
        let response = self.provider.complete(request).await.map_err(|e| e.to_string())?;
        debug!(
            model = %self.config.summary_model,
            messages = messages.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Summary generated"
        );

        let text = response.message.content.trim();
        if text.is_empty() {
            Ok(summarize::EMPTY_SUMMARY.to_string())
        } else {
            Ok(text.to_string())
        }
    }
}
