//! CLI command definitions using clap.
//!
//! Defines the main CLI structure and subcommands:
//! - capture: run the diagnostic loop (the default)
//! - show: print a persisted timeline

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Conntrace - repeat an HTTP request until the connection breaks, recording every lifecycle step
#[derive(Parser, Debug)]
#[command(name = "conntrace")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Optional config file path
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Check if verbose mode is enabled
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Main subcommands
#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Send the configured request until a transport failure occurs
    Capture {
        /// Override the target URL
        #[arg(short, long)]
        url: Option<String>,

        /// Directory for the per-attempt artifacts
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },

    /// Print a recorded attempt as a timeline
    Show {
        /// Artifact to print (default: the newest one in the output directory)
        path: Option<PathBuf>,

        /// Directory searched when no path is given
        #[arg(short, long)]
        out_dir: Option<PathBuf>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_none() {
        let cli = Cli::try_parse_from(["conntrace"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.is_verbose());
    }

    #[test]
    fn test_capture_with_overrides() {
        let cli = Cli::try_parse_from(["conntrace", "-v", "capture", "--url", "http://127.0.0.1:8080/", "-o", "traces"]).unwrap();
        assert!(cli.is_verbose());
        assert_eq!(
            cli.command,
            Some(Commands::Capture {
                url: Some("http://127.0.0.1:8080/".to_string()),
                out_dir: Some(PathBuf::from("traces")),
            })
        );
    }

    #[test]
    fn test_show_with_path_and_global_config() {
        let cli = Cli::try_parse_from(["conntrace", "show", "out/1-000001-log.jsonl", "--config", "c.yml"]).unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("c.yml")));
        assert_eq!(
            cli.command,
            Some(Commands::Show {
                path: Some(PathBuf::from("out/1-000001-log.jsonl")),
                out_dir: None,
            })
        );
    }
}
