//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "tandem",
    version,
    about = "Local coordination server for paired AI coding agents"
)]
pub struct Cli {
    /// Load configuration from a specific file instead of .tandem/
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print `unread=<n> pending=<n>` for an agent and exit
    Status { agent: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_status() {
        let cli = Cli::parse_from(["tandem", "status", "cursor"]);
        match cli.command {
            Some(Commands::Status { agent }) => assert_eq!(agent, "cursor"),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_server_default() {
        let cli = Cli::parse_from(["tandem"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_parse_config_flag() {
        let cli = Cli::parse_from(["tandem", "--config", "/tmp/t.yaml"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/t.yaml")));
    }
}
