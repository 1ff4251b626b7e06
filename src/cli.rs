//! Command-line interface types

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;

const MAX_TOKEN_LEN: usize = 128;

#[derive(Parser, Debug)]
#[command(name = "lbmon")]
#[command(about = "Keeps a failover watcher running for every up, always-on cluster", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (missing file means defaults)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Verbose logging; without a command, run in the foreground
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start the supervisor in the background
    Start,

    /// Stop the running supervisor
    Stop,

    /// Stop, then start the supervisor
    Restart,

    /// Run the supervisor attached to the terminal
    Foreground,

    /// Watch a single cluster (launched by the supervisor)
    #[command(hide = true)]
    Worker {
        /// Cluster to claim
        #[arg(long)]
        cluster_id: u32,

        /// Pid of the launching supervisor
        #[arg(long)]
        parent_pid: u32,

        /// Start token of the launching supervisor
        #[arg(long, value_parser = clap_token_validator)]
        parent_token: String,
    },
}

impl Cli {
    /// The command to run, applying the defaults for a bare invocation.
    pub fn resolved_command(&self) -> Commands {
        match &self.command {
            Some(command) => command.clone(),
            None if self.debug => Commands::Foreground,
            None => Commands::Start,
        }
    }
}

/// Tokens are UUIDs in practice; accept only characters that survive a
/// round-trip through the two-line sentinel file.
pub fn clap_token_validator(s: &str) -> Result<String, String> {
    if s.is_empty() {
        return Err("token cannot be empty".to_string());
    }
    if s.len() > MAX_TOKEN_LEN {
        return Err(format!("token exceeds {MAX_TOKEN_LEN} characters"));
    }
    if !s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
        return Err("token may only contain ASCII letters, digits and '-'".to_string());
    }
    Ok(s.to_string())
}
