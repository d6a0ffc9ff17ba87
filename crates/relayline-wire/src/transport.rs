//! Transport contract.
//!
//! A transport owns connection acceptance and framing. It tells the engine
//! about new connections ([`ConnectionEngine::connected`]), inbound events
//! ([`ConnectionEngine::dispatch`]) and closed connections
//! ([`ConnectionEngine::disconnected`]), and hands the engine a
//! [`TransportHandle`] per connection for outbound events.
//!
//! [`ConnectionEngine::connected`]: crate::engine::ConnectionEngine::connected
//! [`ConnectionEngine::dispatch`]: crate::engine::ConnectionEngine::dispatch
//! [`ConnectionEngine::disconnected`]: crate::engine::ConnectionEngine::disconnected

use relayline_types::error::WireError;
use relayline_types::frame::Frame;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Identity of one live transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Outbound half of a transport connection.
pub trait TransportHandle: Send + Sync + fmt::Debug + 'static {
    /// Identity of the underlying connection.
    fn connection_id(&self) -> ConnectionId;

    /// Emit a named event carrying `payload`. Must not block.
    fn emit(&self, event: &str, payload: Value) -> Result<(), WireError>;
}

/// In-process connection that records everything emitted on it.
///
/// Useful for driving an engine without a network, in tests or when the
/// transport lives in the same process.
#[derive(Debug)]
pub struct MemoryConnection {
    id: ConnectionId,
    emitted: Mutex<Vec<(String, Value)>>,
    closed: AtomicBool,
}

impl MemoryConnection {
    pub fn new(id: u64) -> Arc<Self> {
        Arc::new(Self {
            id: ConnectionId(id),
            emitted: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Make every later `emit` fail with [`WireError::ConnectionClosed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Drain the recorded `(event, payload)` pairs.
    pub fn take_emitted(&self) -> Vec<(String, Value)> {
        let mut emitted = self.emitted.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *emitted)
    }

    /// Drain the recorded payloads, decoded as frames. Non-frame payloads are skipped.
    pub fn take_frames(&self) -> Vec<Frame> {
        self.take_emitted()
            .into_iter()
            .filter_map(|(_, payload)| Frame::decode(payload).ok())
            .collect()
    }

    /// Number of payloads recorded and not yet drained.
    pub fn emitted_count(&self) -> usize {
        self.emitted.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl TransportHandle for MemoryConnection {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), WireError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(WireError::ConnectionClosed);
        }
        let mut emitted = self.emitted.lock().unwrap_or_else(|e| e.into_inner());
        emitted.push((event.to_string(), payload));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_connection_records() {
        let conn = MemoryConnection::new(7);
        assert_eq!(conn.connection_id(), ConnectionId(7));
        conn.emit("a", json!(1)).unwrap();
        conn.emit("b", json!({"type": "raw.response", "requestId": "x"}))
            .unwrap();
        assert_eq!(conn.emitted_count(), 2);

        let frames = conn.take_frames();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].request_id(), "x");
        assert_eq!(conn.emitted_count(), 0);
    }

    #[test]
    fn test_memory_connection_close() {
        let conn = MemoryConnection::new(1);
        conn.close();
        assert!(matches!(
            conn.emit("a", json!(null)),
            Err(WireError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_connection_id_display() {
        assert_eq!(ConnectionId(42).to_string(), "conn-42");
    }
}
