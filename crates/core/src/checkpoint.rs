//! Summary checkpoints produced by summarizing compaction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use crate::message::Message;

/// Separator placed between checkpoint texts when they are concatenated.
pub const CHECKPOINT_SEPARATOR: &str = "\n\n---\n\n";

/// A persisted summary covering a contiguous range of messages.
///
/// The range is inclusive on both ends and expressed with the same
/// `(created_at, seq)` key messages are ordered by.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryCheckpoint {
    pub id: String,
    pub session_id: String,
    pub summary: String,
    pub from_at: DateTime<Utc>,
    pub from_seq: i64,
    pub to_at: DateTime<Utc>,
    pub to_seq: i64,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
}

impl SummaryCheckpoint {
    /// Build a checkpoint over `covered`, which must be in transcript order.
    /// Returns `None` for an empty range.
    pub fn covering(session_id: &str, summary: impl Into<String>, covered: &[Message]) -> Option<Self> {
        let first = covered.first()?;
        let last = covered.last()?;
        Some(Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            summary: summary.into(),
            from_at: first.created_at,
            from_seq: first.seq,
            to_at: last.created_at,
            to_seq: last.seq,
            message_count: covered.len(),
            created_at: Utc::now(),
        })
    }

    pub fn start_key(&self) -> (DateTime<Utc>, i64) {
        (self.from_at, self.from_seq)
    }

    pub fn end_key(&self) -> (DateTime<Utc>, i64) {
        (self.to_at, self.to_seq)
    }

    /// Whether `message` falls inside this checkpoint's range.
    pub fn covers(&self, message: &Message) -> bool {
        let key = message.order_key();
        self.start_key() <= key && key <= self.end_key()
    }

    pub fn overlaps(&self, other: &SummaryCheckpoint) -> bool {
        self.start_key() <= other.end_key() && other.start_key() <= self.end_key()
    }
}

/// Concatenate checkpoint texts in chronological order of their ranges,
/// regardless of the order they were produced in.
pub fn concatenate(checkpoints: &[SummaryCheckpoint]) -> String {
    let mut ordered: Vec<&SummaryCheckpoint> = checkpoints.iter().collect();
    ordered.sort_by_key(|c| (c.start_key(), c.end_key()));
    ordered
        .iter()
        .map(|c| c.summary.as_str())
        .collect::<Vec<_>>()
        .join(CHECKPOINT_SEPARATOR)
}
