//! Tooling & Integration Layer
//!
//! The command-line surface and interactive prompts.

pub mod cli;
pub mod prompt;

pub use cli::{Cli, CliContext, Collaborators, CommandOutput, Commands, SyncArgs};
pub use prompt::TerminalPrompter;
