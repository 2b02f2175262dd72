//! CLI argument parsing using clap 4.x derive macros

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Streams step-by-step progress of a document question-answering crew
/// to WebSocket clients
#[derive(Parser, Debug)]
#[command(name = "crewstream")]
#[command(author, about, long_about = None)]
#[command(disable_version_flag = true)]
pub struct Cli {
    /// The command to execute
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file (defaults to ./crewstream.toml, then the config directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Print version information
    #[arg(long)]
    pub version: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the WebSocket server
    Serve {
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// WebSocket endpoint path
        #[arg(long)]
        path: Option<String>,

        /// Directory of .txt / .md documents to index
        #[arg(short, long)]
        data_dir: Option<PathBuf>,

        /// Pause between progress records, in milliseconds
        #[arg(long)]
        step_delay_ms: Option<u64>,
    },

    /// Send one query to a running server and print the stream
    Ask {
        /// The question to ask
        query: String,

        /// Server URL
        #[arg(short, long, default_value = "ws://127.0.0.1:8000/ws")]
        url: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        cmd: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Write the default configuration to a file
    Init {
        /// Destination (defaults to the config directory)
        path: Option<PathBuf>,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the effective configuration, secrets masked
    Show,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_overrides() {
        let cli = Cli::parse_from(["crewstream", "serve", "--port", "9000", "--step-delay-ms", "0"]);
        match cli.command {
            Some(Commands::Serve {
                port, step_delay_ms, bind, ..
            }) => {
                assert_eq!(port, Some(9000));
                assert_eq!(step_delay_ms, Some(0));
                assert_eq!(bind, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_ask_defaults() {
        let cli = Cli::parse_from(["crewstream", "-v", "ask", "What is Uber's revenue?"]);
        assert!(cli.verbose);
        match cli.command {
            Some(Commands::Ask { query, url }) => {
                assert_eq!(query, "What is Uber's revenue?");
                assert_eq!(url, "ws://127.0.0.1:8000/ws");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
