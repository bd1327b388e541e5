//! CLI subcommand handlers.

pub mod agent;
pub mod approvals;
pub mod doctor;
pub mod init;
pub mod run;
pub mod say;
pub mod session;
pub mod tools;
