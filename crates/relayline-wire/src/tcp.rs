//! TcpTransport: carries named events over TCP.
//!
//! Each event travels as a JSON [`Envelope`] (`{"event": ..., "payload":
//! ...}`) prefixed with a 4-byte big-endian length. Every connection gets a
//! reader task that feeds the engine and a writer task drained from an
//! unbounded channel, so [`TransportHandle::emit`] never blocks the
//! dispatch path.
//!
//! The transport is symmetric: [`TcpTransport::serve`] registers accepted
//! clients as peers, [`TcpTransport::connect`] registers the remote server
//! as a peer of a client-side engine.

use crate::engine::ConnectionEngine;
use crate::registry::Peer;
use crate::transport::{ConnectionId, TransportHandle};
use relayline_types::error::WireError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Maximum single frame size (16 MB).
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// One named event on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub event: String,
    pub payload: Value,
}

/// Encode an envelope to bytes (4-byte big-endian length + JSON).
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, WireError> {
    let json = serde_json::to_vec(envelope)?;
    // Compare before narrowing to u32.
    if json.len() > MAX_FRAME_SIZE as usize {
        return Err(WireError::MessageTooLarge {
            size: json.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    let len = json.len() as u32;
    let mut bytes = Vec::with_capacity(4 + json.len());
    bytes.extend_from_slice(&len.to_be_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

/// Write a framed envelope.
pub async fn write_envelope<W>(writer: &mut W, envelope: &Envelope) -> Result<(), WireError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_envelope(envelope)?;
    writer.write_all(&bytes).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame body. A clean EOF before the header maps to
/// [`WireError::ConnectionClosed`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }

    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_SIZE {
        return Err(WireError::MessageTooLarge {
            size: len as usize,
            max: MAX_FRAME_SIZE,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await?;
    Ok(body)
}

/// Read and parse one framed envelope.
pub async fn read_envelope<R>(reader: &mut R) -> Result<Envelope, WireError>
where
    R: AsyncRead + Unpin,
{
    let body = read_frame(reader).await?;
    Ok(serde_json::from_slice(&body)?)
}

/// Outbound half of one TCP connection.
#[derive(Debug)]
pub struct TcpConnection {
    id: ConnectionId,
    remote_addr: SocketAddr,
    outbox: mpsc::UnboundedSender<Envelope>,
}

impl TcpConnection {
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl TransportHandle for TcpConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), WireError> {
        self.outbox
            .send(Envelope {
                event: event.to_string(),
                payload,
            })
            .map_err(|_| WireError::ConnectionClosed)
    }
}

/// TCP transport feeding a [`ConnectionEngine`].
pub struct TcpTransport {
    engine: Arc<ConnectionEngine>,
    next_connection: AtomicU64,
}

impl TcpTransport {
    pub fn new(engine: Arc<ConnectionEngine>) -> Arc<Self> {
        Arc::new(Self {
            engine,
            next_connection: AtomicU64::new(1),
        })
    }

    pub fn engine(&self) -> &Arc<ConnectionEngine> {
        &self.engine
    }

    /// Bind `addr` and accept connections in a spawned task.
    pub async fn bind(
        self: &Arc<Self>,
        addr: SocketAddr,
    ) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), WireError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Relayline: listening on {}", local_addr);

        let transport = Arc::clone(self);
        let handle = tokio::spawn(async move {
            transport.serve(listener).await;
        });
        Ok((local_addr, handle))
    }

    /// Accept loop. Runs until the task is dropped.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Relayline: accepted connection from {}", addr);
                    self.attach(stream, addr);
                }
                Err(e) => {
                    error!("Relayline: accept error: {}", e);
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Connect to a remote engine and register it as a peer.
    pub async fn connect(self: &Arc<Self>, addr: SocketAddr) -> Result<Peer, WireError> {
        info!("Relayline: connecting to {}", addr);
        let stream = TcpStream::connect(addr).await?;
        Ok(self.attach(stream, addr))
    }

    /// Register a connected stream with the engine and start its I/O tasks.
    fn attach(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Peer {
        let id = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed));
        if let Err(e) = stream.set_nodelay(true) {
            debug!(connection = %id, error = %e, "Failed to set TCP_NODELAY");
        }
        let (mut reader, mut writer) = stream.into_split();
        let (outbox, mut inbox) = mpsc::unbounded_channel::<Envelope>();

        tokio::spawn(async move {
            while let Some(envelope) = inbox.recv().await {
                if let Err(e) = write_envelope(&mut writer, &envelope).await {
                    warn!(connection = %id, error = %e, "Write failed, closing writer");
                    break;
                }
            }
        });

        let peer = self.engine.connected(Arc::new(TcpConnection {
            id,
            remote_addr: addr,
            outbox,
        }));

        let engine = Arc::clone(&self.engine);
        tokio::spawn(async move {
            if let Err(e) = read_loop(&mut reader, id, &engine).await {
                debug!(connection = %id, error = %e, "Connection ended");
            }
            engine.disconnected(id);
        });

        peer
    }
}

/// Feed inbound envelopes to the engine until the connection ends.
async fn read_loop<R>(
    reader: &mut R,
    id: ConnectionId,
    engine: &ConnectionEngine,
) -> Result<(), WireError>
where
    R: AsyncRead + Unpin,
{
    loop {
        let body = match read_frame(reader).await {
            Ok(body) => body,
            Err(WireError::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e),
        };
        // The length prefix keeps the stream aligned, so a bad body only costs one frame.
        match serde_json::from_slice::<Envelope>(&body) {
            Ok(envelope) => engine.dispatch(id, &envelope.event, envelope.payload),
            Err(e) => debug!(connection = %id, error = %e, "Skipping undecodable envelope"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OutboundRequest;
    use crate::handler::{ConnectionHandler, IncomingRequest, Responder};
    use relayline_types::config::EngineConfig;
    use serde_json::json;
    use std::time::Duration;

    struct Echo;

    impl ConnectionHandler for Echo {
        fn on_request(&self, request: IncomingRequest, responder: Responder) {
            let _ = responder.respond(json!({"echo": request.data}));
        }
    }

    #[test]
    fn test_encode_envelope_prefix() {
        let envelope = Envelope {
            event: "connection.event".to_string(),
            payload: json!({"type": "raw.response", "requestId": "1"}),
        };
        let bytes = encode_envelope(&envelope).unwrap();
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
        assert_eq!(len as usize, bytes.len() - 4);
        let decoded: Envelope = serde_json::from_slice(&bytes[4..]).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_encode_rejects_oversized_envelope() {
        let envelope = Envelope {
            event: "e".to_string(),
            payload: Value::String("x".repeat(MAX_FRAME_SIZE as usize)),
        };
        match encode_envelope(&envelope) {
            Err(WireError::MessageTooLarge { size, max }) => {
                assert!(size > MAX_FRAME_SIZE as usize);
                assert_eq!(max, MAX_FRAME_SIZE);
            }
            other => panic!("expected MessageTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_read_envelope_from_stream() {
        let envelope = Envelope {
            event: "e".to_string(),
            payload: json!([1, 2, 3]),
        };
        let bytes = encode_envelope(&envelope).unwrap();
        let mut reader = tokio_test::io::Builder::new().read(&bytes).build();
        assert_eq!(read_envelope(&mut reader).await.unwrap(), envelope);
    }

    #[tokio::test]
    async fn test_read_frame_eof_is_closed() {
        let mut reader = tokio_test::io::Builder::new().build();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = (MAX_FRAME_SIZE + 1).to_be_bytes();
        let mut reader = tokio_test::io::Builder::new().read(&header).build();
        assert!(matches!(
            read_frame(&mut reader).await,
            Err(WireError::MessageTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_tcp_round_trip() {
        let server_engine = Arc::new(ConnectionEngine::new(
            EngineConfig::default(),
            Arc::new(Echo),
        ));
        let server = TcpTransport::new(Arc::clone(&server_engine));
        let (addr, _accept) = server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let client_engine = Arc::new(ConnectionEngine::with_defaults());
        let client = TcpTransport::new(Arc::clone(&client_engine));
        let server_peer = client.connect(addr).await.unwrap();

        let reply = client_engine
            .call(OutboundRequest::new(&server_peer.id, json!("hi")).timeout(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(reply, json!({"echo": "hi"}));
        assert_eq!(client_engine.pending_count(), 0);
        assert_eq!(server_engine.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_removes_peer() {
        let server_engine = Arc::new(ConnectionEngine::with_defaults());
        let server = TcpTransport::new(Arc::clone(&server_engine));
        let (addr, _accept) = server.bind("127.0.0.1:0".parse().unwrap()).await.unwrap();

        let stream = TcpStream::connect(addr).await.unwrap();
        for _ in 0..50 {
            if server_engine.registry().len() == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server_engine.registry().len(), 1);

        drop(stream);
        for _ in 0..50 {
            if server_engine.registry().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(server_engine.registry().is_empty());
    }
}
