//! Transcript messages: the append-only record of a session.
//!
//! Messages are immutable once written and never reordered. The ordering
//! key is creation time, with ties broken by the insertion sequence number
//! the repository assigns.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use crate::error::StoreError;

/// Who (or what) produced a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Human,
    Agent,
    System,
    ToolCall,
    ToolResult,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Agent => "agent",
            Self::System => "system",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
        }
    }

    /// Human and agent messages are the ones a conversation is "about".
    pub fn is_conversational(&self) -> bool {
        matches!(self, Self::Human | Self::Agent)
    }
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageRole {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(Self::Human),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            "tool_call" => Ok(Self::ToolCall),
            "tool_result" => Ok(Self::ToolResult),
            other => Err(StoreError::Invalid(format!("unknown message role '{other}'"))),
        }
    }
}

/// A persisted transcript entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,

    /// Insertion sequence, assigned by the repository. Breaks timestamp ties.
    pub seq: i64,

    pub role: MessageRole,

    /// The agent that produced this message (agent, tool call, tool result)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    pub content: String,

    /// Capability name for tool calls and results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    /// Parsed arguments for tool calls
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<serde_json::Value>,

    pub created_at: DateTime<Utc>,
}

impl Message {
    /// The total ordering key: creation time, then insertion sequence.
    pub fn order_key(&self) -> (DateTime<Utc>, i64) {
        (self.created_at, self.seq)
    }

    /// A synthetic system message dated before every real message.
    ///
    /// Used to carry summaries into a compacted context; it always sorts first.
    pub fn synthetic_system(session_id: &str, content: impl Into<String>) -> Self {
        Self {
            id: "summary".into(),
            session_id: session_id.to_string(),
            seq: 0,
            role: MessageRole::System,
            agent_id: None,
            content: content.into(),
            tool_name: None,
            tool_args: None,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
        }
    }
}

/// Sort messages into transcript order in place.
pub fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by_key(Message::order_key);
}

/// A message about to be appended. The repository assigns id, seq and time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub session_id: String,
    pub role: MessageRole,
    pub agent_id: Option<String>,
    pub content: String,
    pub tool_name: Option<String>,
    pub tool_args: Option<serde_json::Value>,
}

impl NewMessage {
    fn base(session_id: &str, role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.to_string(),
            role,
            agent_id: None,
            content: content.into(),
            tool_name: None,
            tool_args: None,
        }
    }

    pub fn human(session_id: &str, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::Human, content)
    }

    pub fn system(session_id: &str, content: impl Into<String>) -> Self {
        Self::base(session_id, MessageRole::System, content)
    }

    pub fn agent(session_id: &str, agent_id: &str, content: impl Into<String>) -> Self {
        let mut msg = Self::base(session_id, MessageRole::Agent, content);
        msg.agent_id = Some(agent_id.to_string());
        msg
    }

    /// A tool invocation. The content mirrors the arguments as JSON text.
    pub fn tool_call(session_id: &str, agent_id: &str, tool_name: &str, args: serde_json::Value) -> Self {
        let mut msg = Self::base(session_id, MessageRole::ToolCall, args.to_string());
        msg.agent_id = Some(agent_id.to_string());
        msg.tool_name = Some(tool_name.to_string());
        msg.tool_args = Some(args);
        msg
    }

    pub fn tool_result(session_id: &str, agent_id: &str, tool_name: &str, result: &serde_json::Value) -> Self {
        let mut msg = Self::base(session_id, MessageRole::ToolResult, result.to_string());
        msg.agent_id = Some(agent_id.to_string());
        msg.tool_name = Some(tool_name.to_string());
        msg
    }

    /// Complete the record with repository-assigned fields.
    pub fn into_message(self, id: String, seq: i64, created_at: DateTime<Utc>) -> Message {
        Message {
            id,
            session_id: self.session_id,
            seq,
            role: self.role,
            agent_id: self.agent_id,
            content: self.content,
            tool_name: self.tool_name,
            tool_args: self.tool_args,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn msg(seq: i64, at: DateTime<Utc>) -> Message {
        NewMessage::human("s", format!("m{seq}")).into_message(format!("id{seq}"), seq, at)
    }

    #[test]
    fn ties_break_by_sequence() {
        let now = Utc::now();
        let mut messages = vec![msg(3, now), msg(1, now), msg(2, now - Duration::seconds(1))];
        sort_chronologically(&mut messages);
        let order: Vec<i64> = messages.iter().map(|m| m.seq).collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn synthetic_system_sorts_first() {
        let mut messages = vec![msg(1, Utc::now()), Message::synthetic_system("s", "summary")];
        sort_chronologically(&mut messages);
        assert_eq!(messages[0].role, MessageRole::System);
        assert_eq!(messages[0].id, "summary");
    }

    #[test]
    fn tool_call_mirrors_args_as_content() {
        let args = serde_json::json!({"expression": "2+2"});
        let new = NewMessage::tool_call("s", "a", "calculator", args.clone());
        assert_eq!(new.content, args.to_string());
        assert_eq!(new.tool_args, Some(args));
        assert_eq!(new.tool_name.as_deref(), Some("calculator"));
    }

    #[test]
    fn role_round_trips_through_text() {
        for role in [MessageRole::Human, MessageRole::ToolResult] {
            assert_eq!(role.as_str().parse::<MessageRole>().unwrap(), role);
        }
    }
}
