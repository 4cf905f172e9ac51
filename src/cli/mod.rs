//! CLI module for the convergent tool.
//!
//! This module provides the command-line interface for planning, applying
//! and rendering cluster infrastructure.

mod commands;
mod output;

pub use commands::{Cli, Commands, DocumentFormat, OutputFormat};
pub use output::OutputFormatter;
