//! Clap CLI definitions for Relayline.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  relayline serve                           Run an echo peer on the configured address
  relayline call --data '{\"x\": 1}'          Send one request and print the reply
  relayline call --event whoami --data null  Ask the server for your peer ID
  relayline rest --method GET --path /health Send one REST-shaped request";

/// Relayline: request/response correlation over event connections.
#[derive(Parser)]
#[command(name = "relayline", version, after_help = AFTER_HELP)]
pub struct Cli {
    /// Path to config file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Accept connections and answer every request with an echo.
    Serve {
        /// Address to bind (overrides `listen_addr` from the config file).
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
    /// Send one raw request and print the reply.
    Call {
        /// Address of the peer to connect to.
        #[arg(long, default_value = "127.0.0.1:4300")]
        addr: SocketAddr,
        /// Request body as JSON.
        #[arg(long)]
        data: String,
        /// Application-level event label.
        #[arg(long)]
        event: Option<String>,
        /// Ask the server to relay the request to this peer ID.
        #[arg(long)]
        relay_to: Option<String>,
        /// Request timeout in milliseconds (overrides the config file).
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Send one REST-shaped request and print the reply.
    Rest {
        /// Address of the peer to connect to.
        #[arg(long, default_value = "127.0.0.1:4300")]
        addr: SocketAddr,
        /// Request path.
        #[arg(long)]
        path: String,
        /// Request method.
        #[arg(long, default_value = "GET")]
        method: String,
        /// Request body as JSON.
        #[arg(long)]
        data: Option<String>,
        /// Extra header as `name=value`. Repeatable.
        #[arg(long = "header", value_name = "NAME=VALUE")]
        headers: Vec<String>,
    },
}
