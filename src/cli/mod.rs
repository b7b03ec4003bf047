//! CLI module for bastion-tunnel
//!
//! Argument parsing and subcommand dispatch.

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// bastion-tunnel - SSH jump-host tunnels and private key conversion
#[derive(Parser, Debug, Clone)]
#[command(name = "bastion-tunnel")]
#[command(author = "Bastion Tunnel Contributors")]
#[command(version)]
#[command(about = "Open local TCP tunnels through an SSH jump host", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbosity level (-v, -vv, -vvv)
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, default_value = "human")]
    pub output: OutputFormat,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true, env = "BASTION_TUNNEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

/// Output format for CLI
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable output with colors
    #[default]
    Human,
    /// JSON output for scripting
    Json,
}

/// Available subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Open a tunnel and keep it up until interrupted
    Open(commands::open::OpenArgs),

    /// Show the family, encoding and fingerprint of a private key
    #[command(name = "inspect-key")]
    InspectKey(commands::inspect_key::InspectKeyArgs),

    /// Convert a private key to the OpenSSH encoding
    #[command(name = "convert-key")]
    ConvertKey(commands::convert_key::ConvertKeyArgs),
}

impl Cli {
    /// Parse command-line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Get the effective verbosity level (0-3)
    pub fn verbosity(&self) -> u8 {
        self.verbose.min(3)
    }

    /// Check if JSON output is requested
    pub fn is_json(&self) -> bool {
        matches!(self.output, OutputFormat::Json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from([
            "bastion-tunnel",
            "-vvvvv",
            "--output",
            "json",
            "inspect-key",
            "id_rsa",
        ])
        .unwrap();
        assert_eq!(cli.verbosity(), 3);
        assert!(cli.is_json());
        assert!(matches!(cli.command, Commands::InspectKey(_)));
    }

    #[test]
    fn test_unknown_output_format_rejected() {
        assert!(Cli::try_parse_from(["bastion-tunnel", "--output", "yaml", "inspect-key", "k"]).is_err());
    }
}
