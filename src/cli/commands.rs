//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::target::TargetKind;

/// Convergent - declarative cluster infrastructure reconciliation.
#[derive(Parser, Debug)]
#[command(name = "convergent")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, env = "CONVERGENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the run configuration.
    Validate {
        /// Show all warnings, not just errors.
        #[arg(short, long)]
        warnings: bool,
    },

    /// Show what an apply would change, without changing anything.
    Plan,

    /// Apply changes through the cloud API.
    Apply {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Emit a Terraform or CloudFormation document.
    Render {
        /// Document format.
        #[arg(short, long, value_enum)]
        format: DocumentFormat,

        /// Output directory (defaults to `output.dir` from the config).
        #[arg(long)]
        out: Option<PathBuf>,
    },

    /// Run against the target named in the configuration.
    Run,

    /// Check for drift between config and actual state.
    Drift,

    /// Show the addresses of load balancers.
    Addresses,
}

/// Document formats accepted by `render`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum DocumentFormat {
    /// Terraform JSON.
    Terraform,
    /// CloudFormation JSON.
    Cloudformation,
}

impl From<DocumentFormat> for TargetKind {
    fn from(format: DocumentFormat) -> Self {
        match format {
            DocumentFormat::Terraform => Self::Terraform,
            DocumentFormat::Cloudformation => Self::CloudFormation,
        }
    }
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
