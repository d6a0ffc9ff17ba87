//! Peer registry: tracks the peers behind live transport connections.
//!
//! The [`PeerRegistry`] is a thread-safe map of peers keyed by peer ID, with
//! a second index keyed by [`ConnectionId`] so disconnect notifications
//! resolve in O(1). Clones share the same underlying state.

use crate::id::IdProvider;
use crate::transport::{ConnectionId, TransportHandle};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// A registered endpoint of a live transport connection.
#[derive(Debug, Clone)]
pub struct Peer {
    /// Unique peer ID within this process.
    pub id: String,
    /// Outbound handle of the peer's connection.
    pub connection: Arc<dyn TransportHandle>,
    /// Application data attached to the peer.
    pub data: Option<Value>,
    /// When the connection was registered.
    pub connected_at: DateTime<Utc>,
}

impl Peer {
    pub fn connection_id(&self) -> ConnectionId {
        self.connection.connection_id()
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    by_id: HashMap<String, Peer>,
    by_connection: HashMap<ConnectionId, String>,
}

/// Thread-safe registry of live peers.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<RwLock<RegistryInner>>,
    ids: Arc<IdProvider>,
}

impl PeerRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the peer behind `connection` under a fresh ID.
    ///
    /// A connection maps to at most one peer: registering an already known
    /// connection returns the existing peer unchanged.
    pub fn create_peer(&self, connection: Arc<dyn TransportHandle>) -> Peer {
        let conn_id = connection.connection_id();
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = inner
            .by_connection
            .get(&conn_id)
            .and_then(|id| inner.by_id.get(id))
        {
            return existing.clone();
        }

        let peer = Peer {
            id: self.ids.next_id(),
            connection,
            data: None,
            connected_at: Utc::now(),
        };
        inner.by_connection.insert(conn_id, peer.id.clone());
        inner.by_id.insert(peer.id.clone(), peer.clone());
        peer
    }

    /// Get a snapshot of a specific peer.
    pub fn get_by_id(&self, id: &str) -> Option<Peer> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.get(id).cloned()
    }

    /// Get the peer registered for a connection.
    pub fn get_by_connection(&self, conn_id: ConnectionId) -> Option<Peer> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .by_connection
            .get(&conn_id)
            .and_then(|id| inner.by_id.get(id))
            .cloned()
    }

    pub fn exists_with_id(&self, id: &str) -> bool {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.contains_key(id)
    }

    /// Remove a peer by ID. Absent peers are ignored.
    pub fn remove_by_id(&self, id: &str) -> Option<Peer> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let peer = inner.by_id.remove(id)?;
        inner.by_connection.remove(&peer.connection_id());
        Some(peer)
    }

    /// Remove the peer registered for a connection. Unknown connections are ignored.
    pub fn remove_by_connection(&self, conn_id: ConnectionId) -> Option<Peer> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let id = inner.by_connection.remove(&conn_id)?;
        inner.by_id.remove(&id)
    }

    /// Attach (or clear) application data on a peer. Returns false if the peer is unknown.
    pub fn set_data(&self, id: &str, data: Option<Value>) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        match inner.by_id.get_mut(id) {
            Some(peer) => {
                peer.data = data;
                true
            }
            None => false,
        }
    }

    /// Snapshot of all live peers, ordered by connection time.
    ///
    /// The returned vector is a copy: later registry mutations do not affect it.
    pub fn all_peers(&self) -> Vec<Peer> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut peers: Vec<Peer> = inner.by_id.values().cloned().collect();
        peers.sort_by_key(|p| (p.connected_at, p.connection_id()));
        peers
    }

    /// Number of live peers.
    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
