//! Repository implementations for Parley.
//!
//! Backends:
//! - **SQLite** (default): durable storage with WAL journaling
//! - **In-memory**: for tests and throwaway sessions
//!
//! Both implement `parley_core::Repository` and keep the same contract:
//! per-session isolation, `(created_at, seq)` message ordering,
//! compare-and-set turn commits and run leases.

pub mod in_memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
mod conformance;

pub use in_memory::InMemoryStore;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
