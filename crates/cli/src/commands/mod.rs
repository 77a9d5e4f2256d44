//! Subcommand implementations

pub mod agents;
pub mod canary;
pub mod ops;
