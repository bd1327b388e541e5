//! Conversation events: live notifications emitted by a running session.
//!
//! Delivery is best-effort: publishing never fails and a consumer that
//! disconnects or lags cannot affect engine state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All events a conversation run can emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// A speaker was selected and is about to be prompted
    TurnStart {
        session_id: String,
        agent_id: String,
        agent_name: String,
        turn_index: u64,
    },

    /// An agent message was persisted
    TurnEnd {
        session_id: String,
        agent_id: String,
        message_id: String,
        content: String,
        /// Text flushed mid-turn alongside tool calls
        #[serde(default)]
        intermediate: bool,
    },

    ToolCall {
        session_id: String,
        agent_id: String,
        tool_name: String,
        args: serde_json::Value,
    },

    ToolResult {
        session_id: String,
        agent_id: String,
        tool_name: String,
        result: serde_json::Value,
        success: bool,
    },

    /// A capability proposal is waiting for a human decision
    ApprovalRequired {
        session_id: String,
        agent_id: String,
        proposal_id: String,
        tool_name: String,
        description: String,
        parameters: serde_json::Value,
        code: String,
    },

    Error {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        agent_id: Option<String>,
        message: String,
    },

    ConversationPaused { session_id: String },

    ConversationResting { session_id: String },

    ConversationComplete { session_id: String },
}

impl ConversationEvent {
    /// The wire name of this event.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStart { .. } => "turn_start",
            Self::TurnEnd { .. } => "turn_end",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::ApprovalRequired { .. } => "approval_required",
            Self::Error { .. } => "error",
            Self::ConversationPaused { .. } => "conversation_paused",
            Self::ConversationResting { .. } => "conversation_resting",
            Self::ConversationComplete { .. } => "conversation_complete",
        }
    }

    /// Terminal events mark the end of a run; exactly one is emitted per run.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ConversationPaused { .. }
                | Self::ConversationResting { .. }
                | Self::ConversationComplete { .. }
        )
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::TurnStart { session_id, .. }
            | Self::TurnEnd { session_id, .. }
            | Self::ToolCall { session_id, .. }
            | Self::ToolResult { session_id, .. }
            | Self::ApprovalRequired { session_id, .. }
            | Self::Error { session_id, .. }
            | Self::ConversationPaused { session_id }
            | Self::ConversationResting { session_id }
            | Self::ConversationComplete { session_id } => session_id,
        }
    }
}

/// A broadcast-based event bus for conversation events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub. Cloning the bus
/// shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Arc<ConversationEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: ConversationEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<ConversationEvent>> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn event_bus_publish_subscribe() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();

        bus.publish(ConversationEvent::ToolCall {
            session_id: "s".into(),
            agent_id: "a".into(),
            tool_name: "calculator".into(),
            args: serde_json::json!({"expression": "1+1"}),
        });

        let event = rx.recv().await.unwrap();
        match event.as_ref() {
            ConversationEvent::ToolCall { tool_name, .. } => assert_eq!(tool_name, "calculator"),
            _ => panic!("Expected ToolCall event"),
        }
    }

    #[test]
    fn event_bus_no_subscribers_doesnt_panic() {
        let bus = EventBus::new(16);
        bus.publish(ConversationEvent::ConversationPaused { session_id: "s".into() });
    }

    #[test]
    fn serialized_tag_matches_event_type() {
        let event = ConversationEvent::ConversationResting { session_id: "s".into() };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
        assert!(event.is_terminal());
        assert_eq!(event.session_id(), "s");
    }
}
