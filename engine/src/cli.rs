//! CLI interface for Foreman
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Foreman planning and execution engine
///
/// Turns an instruction into capability invocations, generating and
/// validating new capabilities when none of the registered ones fit.
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run an instruction to completion
    Run {
        /// The instruction to carry out
        instruction: String,

        /// Approve every side-effecting step without prompting
        #[arg(short, long)]
        yes: bool,
    },

    /// List registered capabilities
    Capabilities {
        /// Only show capabilities in this namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Run the sandbox validator on a source file and print the report
    Validate {
        /// Path to the generated unit
        file: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from(["foreman", "capabilities"]);
        assert!(matches!(cli.command, Command::Capabilities { namespace: None }));
        assert!(!cli.json);
        assert!(cli.log.is_none());
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::parse_from([
            "foreman",
            "--json",
            "--log",
            "debug",
            "--config",
            "/tmp/foreman.toml",
            "capabilities",
        ]);
        assert!(cli.json);
        assert_eq!(cli.log, Some("debug".to_string()));
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/foreman.toml")));
    }

    #[test]
    fn test_run_command() {
        let cli = Cli::parse_from(["foreman", "run", "label every unread mail", "--yes"]);
        if let Command::Run { instruction, yes } = cli.command {
            assert_eq!(instruction, "label every unread mail");
            assert!(yes);
        } else {
            panic!("Expected Run command");
        }
    }

    #[test]
    fn test_capabilities_namespace() {
        let cli = Cli::parse_from(["foreman", "capabilities", "--namespace", "workspace"]);
        if let Command::Capabilities { namespace } = cli.command {
            assert_eq!(namespace.as_deref(), Some("workspace"));
        } else {
            panic!("Expected Capabilities command");
        }
    }

    #[test]
    fn test_validate_command() {
        let cli = Cli::parse_from(["foreman", "--json", "validate", "unit.py"]);
        assert!(cli.json);
        assert!(matches!(cli.command, Command::Validate { file } if file == PathBuf::from("unit.py")));
    }
}
