//! CLI argument parsing with clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Parser)]
#[command(name = "fail2drop")]
#[command(author, version, about = "Drop traffic from hosts that keep failing in your logs")]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, global = true)]
    pub config: PathBuf,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose mode (debug output, one line per offense)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Append log records to this file instead of stdout (overrides log_file)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Monitor the configured log sources and ban repeat offenders
    Run {
        /// Read each source's current contents once, enforce, then exit
        #[arg(long)]
        once: bool,

        /// Evaluate once and report what would be banned, without touching the firewall
        #[arg(long)]
        dry_run: bool,

        /// Flush previously installed bans before starting
        #[arg(long)]
        reset: bool,
    },

    /// Validate the configuration and list the active sources
    Check,

    /// Show version
    Version,
}
