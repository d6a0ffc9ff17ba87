//! `relayline call` and `relayline rest`: one request against a running peer.

use anyhow::{bail, Context};
use relayline_types::config::RelaylineConfig;
use relayline_wire::{ConnectionEngine, NoopHandler, OutboundRequest, Peer, RestCall, TcpTransport};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Options for `relayline call`.
pub struct CallArgs {
    pub addr: SocketAddr,
    pub data: String,
    pub event: Option<String>,
    pub relay_to: Option<String>,
    pub timeout_ms: Option<u64>,
}

/// Options for `relayline rest`.
pub struct RestArgs {
    pub addr: SocketAddr,
    pub path: String,
    pub method: String,
    pub data: Option<String>,
    pub headers: Vec<String>,
}

pub fn cmd_call(config: RelaylineConfig, args: CallArgs) -> anyhow::Result<()> {
    let data = parse_json(&args.data)?;
    let mut request = OutboundRequest::new(String::new(), data);
    request.event = args.event;
    request.relay_to = args.relay_to;
    request.timeout = args.timeout_ms.map(Duration::from_millis);

    let rt = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    let reply = rt.block_on(async move {
        let (engine, server) = connect(config, args.addr).await?;
        request.to = server.id;
        engine.call(request).await.context("request failed")
    })?;
    println!("{}", serde_json::to_string_pretty(&reply)?);
    Ok(())
}

pub fn cmd_rest(config: RelaylineConfig, args: RestArgs) -> anyhow::Result<()> {
    let data = args.data.as_deref().map(parse_json).transpose()?;
    let headers = args
        .headers
        .iter()
        .map(|h| parse_header(h))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let rt = tokio::runtime::Runtime::new().context("failed to create Tokio runtime")?;
    let reply = rt.block_on(async move {
        let (engine, server) = connect(config, args.addr).await?;
        let mut call = RestCall::new(server.id, args.method, args.path);
        for (name, value) in headers {
            call = call.header(name, value);
        }
        call.data = data;
        engine.rest_call(call).await.context("REST request failed")
    })?;

    println!("Status: {}", reply.status);
    for header in &reply.headers {
        for (name, value) in header {
            println!("{name}: {value}");
        }
    }
    if let Some(body) = &reply.data {
        println!("{}", serde_json::to_string_pretty(body)?);
    }
    if !reply.is_success() {
        bail!("peer answered with status {}", reply.status);
    }
    Ok(())
}

/// Open a client engine with the server registered as its only peer.
async fn connect(
    config: RelaylineConfig,
    addr: SocketAddr,
) -> anyhow::Result<(Arc<ConnectionEngine>, Peer)> {
    let engine = Arc::new(ConnectionEngine::new(config.engine, Arc::new(NoopHandler)));
    let transport = TcpTransport::new(Arc::clone(&engine));
    let server = transport
        .connect(addr)
        .await
        .with_context(|| format!("failed to connect to {addr}"))?;
    Ok((engine, server))
}

fn parse_json(raw: &str) -> anyhow::Result<Value> {
    serde_json::from_str(raw).with_context(|| format!("--data is not valid JSON: {raw}"))
}

fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => bail!("header '{raw}' must look like NAME=VALUE"),
    }
}
