//! CLI module
//!
//! This module provides the administrative command line: argument parsing
//! and the handlers that run each command against a provider.

pub mod commands;

// Re-exports
pub use commands::{handle_command, Command, CommandType, USAGE};
