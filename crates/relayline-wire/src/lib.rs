//! Relayline wire layer: turns an event-tagged pub/sub transport into a
//! request/response protocol.
//!
//! ## Architecture
//!
//! - **IdProvider**: counter + UUID identifiers for peers and requests
//! - **PeerRegistry**: live peers indexed by ID and by connection
//! - **ConnectionEngine**: lifecycle, inbound dispatch, pending responses
//! - **TransportHandle**: the seam a transport implements to carry frames
//! - **TcpTransport**: length-prefixed JSON transport over TCP

pub mod engine;
pub mod handler;
pub mod id;
pub mod pending;
pub mod registry;
pub mod tcp;
pub mod transport;

pub use engine::{ConnectionEngine, OutboundRequest, RestCall};
pub use handler::{
    ConnectionHandler, IncomingRequest, IncomingRestRequest, NoopHandler, Responder,
    RestResponder,
};
pub use id::IdProvider;
pub use registry::{Peer, PeerRegistry};
pub use tcp::TcpTransport;
pub use transport::{ConnectionId, MemoryConnection, TransportHandle};
