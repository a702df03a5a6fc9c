//! CLI module for stackplan.
//!
//! This module provides the command-line interface for validating project
//! files, planning changesets and maintaining the recorded state.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, StateCommands};
pub use output::OutputFormatter;
