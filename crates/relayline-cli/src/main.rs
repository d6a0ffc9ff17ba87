//! Relayline CLI: run an echo peer or send one request to a running peer.

mod cli;
mod cmd;
mod config;
mod echo;

use crate::cli::{Cli, Commands};
use crate::cmd::client::{CallArgs, RestArgs};
use clap::Parser;

fn init_tracing_stderr(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();

    // Read the config before tracing starts so its log level applies; the
    // outcome is logged once the subscriber is installed.
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(config::default_config_path);
    let loaded = config::read_config(&config_path);
    let log_level = match &loaded {
        Ok(Some(config)) => config.log_level.clone(),
        _ => "info".to_string(),
    };
    init_tracing_stderr(&log_level);
    let config = config::resolve_config(loaded, &config_path);

    let result = match cli.command {
        Commands::Serve { listen } => cmd::serve::cmd_serve(config, listen),
        Commands::Call {
            addr,
            data,
            event,
            relay_to,
            timeout_ms,
        } => cmd::client::cmd_call(
            config,
            CallArgs {
                addr,
                data,
                event,
                relay_to,
                timeout_ms,
            },
        ),
        Commands::Rest {
            addr,
            path,
            method,
            data,
            headers,
        } => cmd::client::cmd_rest(
            config,
            RestArgs {
                addr,
                path,
                method,
                data,
                headers,
            },
        ),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
