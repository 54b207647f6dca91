//! CLI argument parsing via clap.

use chatbridge::site::Transport;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lets chat-site models call local tools through the bridge service.
#[derive(Debug, Parser)]
#[command(name = "chatbridge", version)]
pub struct Args {
    /// Path to config file (default: ./chatbridge.toml or ~/.config/chatbridge/chatbridge.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Override the bridge port.
    #[arg(short = 'p', long = "port", global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the interception host over stdin/stdout (JSON lines).
    Serve,
    /// Check that the bridge is reachable.
    Health,
    /// List services, or the tools of one service.
    Tools {
        #[arg(long = "service")]
        service: Option<String>,
    },
    /// Read or replace the bridge's tool-server configuration.
    Config {
        #[command(subcommand)]
        action: ConfigCommand,
    },
    /// Page through and search cached large results.
    Cache {
        #[command(subcommand)]
        action: CacheCommand,
    },
    /// Restart or stop one tool server.
    Server {
        #[command(subcommand)]
        action: ServerCommand,
    },
    /// Find the first tool call in a captured model reply.
    Detect {
        /// Text file to scan (stdin when omitted).
        path: Option<PathBuf>,
        /// Marker name to look for instead of the configured one.
        #[arg(long = "marker")]
        marker: Option<String>,
    },
    /// Reconstruct model text from a captured response body.
    Extract {
        /// Site profile id.
        #[arg(long = "site")]
        site: String,
        /// Response body file (stdin when omitted).
        path: Option<PathBuf>,
        /// Parse as this transport instead of the profile's.
        #[arg(long = "transport", value_parser = parse_transport)]
        transport: Option<Transport>,
    },
    /// Show how a captured request body would be rewritten.
    Rewrite {
        /// Request URL the body was sent to.
        #[arg(long = "url")]
        url: String,
        /// Request body file (stdin when omitted).
        path: Option<PathBuf>,
    },
    /// Write the default config file.
    Init {
        /// Replace an existing file, keeping a timestamped backup.
        #[arg(long = "force")]
        force: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    Get,
    Set {
        /// New configuration as inline JSON.
        #[arg(conflicts_with = "file", required_unless_present = "file")]
        json: Option<String>,
        /// Read the new configuration from a JSON file.
        #[arg(long = "file")]
        file: Option<PathBuf>,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Fetch a character window of a cached result.
    Page {
        cache_id: String,
        #[arg(long = "start")]
        start: Option<u64>,
        #[arg(long = "end")]
        end: Option<u64>,
    },
    /// Search a cached result for a keyword.
    Search {
        cache_id: String,
        keyword: String,
        #[arg(long = "case-sensitive")]
        case_sensitive: bool,
        #[arg(long = "max-results")]
        max_results: Option<u64>,
    },
    /// Show lines around one line of a cached result.
    Context {
        cache_id: String,
        line: u64,
        #[arg(long = "lines")]
        context_lines: Option<u64>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ServerCommand {
    Restart { name: String },
    Shutdown { name: String },
}

fn parse_transport(value: &str) -> Result<Transport, String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "sse" => Ok(Transport::Sse),
        "json" => Ok(Transport::Json),
        "text" => Ok(Transport::Text),
        other => Err(format!("unknown transport `{other}` (expected sse, json, or text)")),
    }
}
