//! Session: one multi-agent conversation and its scheduling configuration.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;
use crate::error::StoreError;
use crate::message::NewMessage;

/// Allowed bounds for the sliding-window size.
pub const MIN_WINDOW_SIZE: usize = 10;
pub const MAX_WINDOW_SIZE: usize = 200;

/// How the next speaker is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOrder {
    /// Agents speak in `order_index` order, cycling.
    #[default]
    FixedRotation,
    /// The caller names the next speaker; rotation is the fallback.
    Directed,
    /// A routing model picks the next speaker.
    ModelRouted,
}

/// How unbounded history is reduced to a bounded context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStrategy {
    #[default]
    Window,
    Summarize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Setup,
    Active,
    Paused,
    Completed,
}

macro_rules! string_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.to_ascii_lowercase().replace('-', "_").as_str() {
                    $($text => Ok(Self::$variant),)+
                    other => Err(StoreError::Invalid(format!(
                        "unknown {} '{other}'",
                        stringify!($ty)
                    ))),
                }
            }
        }
    };
}

string_enum!(TurnOrder {
    FixedRotation => "fixed_rotation",
    Directed => "directed",
    ModelRouted => "model_routed",
});

string_enum!(MemoryStrategy {
    Window => "window",
    Summarize => "summarize",
});

string_enum!(SessionStatus {
    Setup => "setup",
    Active => "active",
    Paused => "paused",
    Completed => "completed",
});

/// One conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub name: String,
    pub turn_order: TurnOrder,
    pub memory_strategy: MemoryStrategy,
    pub window_size: usize,
    pub status: SessionStatus,

    /// Completed turns so far. Only the engine advances it.
    pub current_turn_index: u64,

    /// Run until cancelled rather than for a fixed number of turns.
    pub is_infinite: bool,

    /// Apply a pacing delay before each turn.
    pub is_slow: bool,

    /// Model used when `turn_order` is `ModelRouted`.
    pub router_model: String,

    /// Proposal currently awaiting a human decision, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_approval: Option<String>,

    /// Set while an engine run holds the session.
    #[serde(default)]
    pub run_lease: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Parameters for creating a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewSession {
    pub name: String,
    #[serde(default)]
    pub turn_order: TurnOrder,
    #[serde(default)]
    pub memory_strategy: MemoryStrategy,
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    #[serde(default)]
    pub is_infinite: bool,
    #[serde(default)]
    pub is_slow: bool,
    #[serde(default = "default_router_model")]
    pub router_model: String,
}

fn default_window_size() -> usize {
    50
}

pub fn default_router_model() -> String {
    "anthropic/claude-haiku-4.5".into()
}

impl NewSession {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            turn_order: TurnOrder::default(),
            memory_strategy: MemoryStrategy::default(),
            window_size: default_window_size(),
            is_infinite: false,
            is_slow: false,
            router_model: default_router_model(),
        }
    }

    /// Reject configurations the engine cannot honour.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.name.trim().is_empty() {
            return Err(StoreError::Invalid("session name must not be empty".into()));
        }
        if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&self.window_size) {
            return Err(StoreError::Invalid(format!(
                "window_size must be between {MIN_WINDOW_SIZE} and {MAX_WINDOW_SIZE}, got {}",
                self.window_size
            )));
        }
        Ok(())
    }

    /// Materialize into a `Session` with a fresh id.
    pub fn into_session(self) -> Session {
        let now = Utc::now();
        Session {
            id: Uuid::new_v4().to_string(),
            name: self.name,
            turn_order: self.turn_order,
            memory_strategy: self.memory_strategy,
            window_size: self.window_size,
            status: SessionStatus::Setup,
            current_turn_index: 0,
            is_infinite: self.is_infinite,
            is_slow: self.is_slow,
            router_model: self.router_model,
            pending_approval: None,
            run_lease: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Configuration changes an operator may apply between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionSettings {
    pub turn_order: Option<TurnOrder>,
    pub memory_strategy: Option<MemoryStrategy>,
    pub window_size: Option<usize>,
    pub is_infinite: Option<bool>,
    pub is_slow: Option<bool>,
    pub router_model: Option<String>,
}

impl SessionSettings {
    /// Apply the present fields to `session`, validating the window size.
    pub fn apply_to(&self, session: &mut Session) -> Result<(), StoreError> {
        if let Some(size) = self.window_size {
            if !(MIN_WINDOW_SIZE..=MAX_WINDOW_SIZE).contains(&size) {
                return Err(StoreError::Invalid(format!(
                    "window_size must be between {MIN_WINDOW_SIZE} and {MAX_WINDOW_SIZE}, got {size}"
                )));
            }
            session.window_size = size;
        }
        if let Some(order) = self.turn_order {
            session.turn_order = order;
        }
        if let Some(strategy) = self.memory_strategy {
            session.memory_strategy = strategy;
        }
        if let Some(infinite) = self.is_infinite {
            session.is_infinite = infinite;
        }
        if let Some(slow) = self.is_slow {
            session.is_slow = slow;
        }
        if let Some(model) = &self.router_model {
            session.router_model = model.clone();
        }
        session.updated_at = Utc::now();
        Ok(())
    }
}

/// What a completed turn commits: the speaker's reply and the counters.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnCommit {
    /// The index the session must currently be at.
    pub expected_index: u64,
    pub status: SessionStatus,
    pub reply: NewMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_defaults() {
        let session = NewSession::named("debate").into_session();
        assert_eq!(session.status, SessionStatus::Setup);
        assert_eq!(session.current_turn_index, 0);
        assert_eq!(session.turn_order, TurnOrder::FixedRotation);
        assert_eq!(session.window_size, 50);
        assert!(!session.run_lease);
    }

    #[test]
    fn window_size_bounds_enforced() {
        let mut new = NewSession::named("x");
        new.window_size = 5;
        assert!(new.validate().is_err());
        new.window_size = 201;
        assert!(new.validate().is_err());
        new.window_size = 200;
        assert!(new.validate().is_ok());
    }

    #[test]
    fn enums_parse_from_cli_spelling() {
        assert_eq!("model-routed".parse::<TurnOrder>().unwrap(), TurnOrder::ModelRouted);
        assert_eq!("SUMMARIZE".parse::<MemoryStrategy>().unwrap(), MemoryStrategy::Summarize);
        assert!("sideways".parse::<TurnOrder>().is_err());
        assert_eq!(SessionStatus::Paused.to_string(), "paused");
    }

    #[test]
    fn settings_reject_bad_window() {
        let mut session = NewSession::named("x").into_session();
        let settings = SessionSettings {
            window_size: Some(3),
            ..Default::default()
        };
        assert!(settings.apply_to(&mut session).is_err());
        assert_eq!(session.window_size, 50);
    }
}
