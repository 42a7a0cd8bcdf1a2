//! CLI module for the Terrace provisioning tool.
//!
//! This module provides the command-line interface for planning, applying
//! and destroying declared infrastructure.

mod commands;
mod output;

pub use commands::{Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
