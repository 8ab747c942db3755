//! Command-line interface definition.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// sitescan: deep malware scan of a web site tree
#[derive(Parser, Debug)]
#[command(name = "sitescan")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json)
    #[arg(long, default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Use this configuration file instead of the default one
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine processing
    Json,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a deep scan against a mounted copy of a site
    Scan {
        /// Local directory standing in for the remote filesystem root
        #[arg(short, long)]
        mount: PathBuf,

        /// Remote path to scan, relative to the mount
        #[arg(short, long, default_value = "/")]
        root: String,

        /// Ticket the scan is attached to
        #[arg(long, default_value = "cli")]
        ticket: String,

        /// Override the number of simultaneous reads
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Quarantine malicious files after the scan (dry run unless --live)
        #[arg(short, long)]
        quarantine: bool,

        /// Actually move files when quarantining
        #[arg(long, requires = "quarantine")]
        live: bool,
    },

    /// Classify local files without scanning a tree
    Classify {
        /// Files to classify
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Show application information
    Info,
}

/// Configuration subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Reset configuration to defaults
    Reset,

    /// Print the configuration file location
    Path,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
