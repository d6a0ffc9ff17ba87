//! `relayline serve`: run an echo peer until Ctrl+C.

use crate::echo::EchoHandler;
use anyhow::Context;
use relayline_types::config::RelaylineConfig;
use relayline_wire::{ConnectionEngine, TcpTransport};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub fn cmd_serve(config: RelaylineConfig, listen: Option<SocketAddr>) -> anyhow::Result<()> {
    let addr = match listen {
        Some(addr) => addr,
        None => config
            .listen_addr
            .parse()
            .with_context(|| format!("invalid listen_addr '{}'", config.listen_addr))?,
    };

    let rt = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    rt.block_on(async move {
        let engine = Arc::new(ConnectionEngine::new(config.engine, Arc::new(EchoHandler)));
        let reaper = engine.spawn_reaper();
        let transport = TcpTransport::new(Arc::clone(&engine));
        let (local_addr, accept) = transport.bind(addr).await?;
        println!("Listening on {local_addr} (Ctrl+C to stop)");

        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for Ctrl+C")?;
        info!(peers = engine.registry().len(), "Stopping");
        accept.abort();
        reaper.abort();
        engine.shutdown();
        Ok::<(), anyhow::Error>(())
    })
}
