//! Application hooks and the responder capabilities handed to them.
//!
//! The engine calls these hooks synchronously from inside inbound dispatch.
//! A hook that needs to do slow work should move the responder into a task
//! and answer from there; responders are `Send + Sync` and cheap to clone.

use crate::registry::{Peer, PeerRegistry};
use relayline_types::error::{RespondError, WireError};
use relayline_types::frame::{Frame, Header, RawResponse, RestReply};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A raw request addressed to this engine.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    pub request_id: String,
    /// Peer that sent the request.
    pub from: Peer,
    /// Application-level event label, if the sender set one.
    pub event: Option<String>,
    pub data: Value,
}

/// A REST-shaped request addressed to this engine.
#[derive(Debug, Clone)]
pub struct IncomingRestRequest {
    pub request_id: String,
    pub from: Peer,
    pub path: String,
    pub method: String,
    pub headers: Vec<Header>,
    pub data: Option<Value>,
}

/// Hooks invoked by the engine. Every method defaults to doing nothing.
pub trait ConnectionHandler: Send + Sync + 'static {
    /// A new peer was registered.
    fn on_connected(&self, _peer: &Peer) {}

    /// A peer was removed after its connection closed.
    fn on_disconnected(&self, _peer: &Peer) {}

    /// A raw request arrived. Dropping the responder leaves the sender unanswered.
    fn on_request(&self, request: IncomingRequest, _responder: Responder) {
        debug!(
            request_id = %request.request_id,
            peer_id = %request.from.id,
            "No request handler, dropping request"
        );
    }

    /// A REST-shaped request arrived.
    fn on_rest_request(&self, request: IncomingRestRequest, _responder: RestResponder) {
        debug!(
            request_id = %request.request_id,
            path = %request.path,
            "No REST handler, dropping request"
        );
    }
}

/// Handler that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHandler;

impl ConnectionHandler for NoopHandler {}

#[derive(Debug)]
struct ReplyTarget {
    request_id: String,
    peer_id: String,
    event: String,
    registry: PeerRegistry,
    used: AtomicBool,
}

impl ReplyTarget {
    fn send(&self, frame: Frame) -> Result<(), RespondError> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(RespondError::AlreadyResponded(self.request_id.clone()));
        }
        let peer = self
            .registry
            .get_by_id(&self.peer_id)
            .ok_or_else(|| RespondError::PeerGone(self.peer_id.clone()))?;
        let payload = frame.encode().map_err(WireError::from)?;
        peer.connection.emit(&self.event, payload)?;
        Ok(())
    }
}

/// Capability to answer one raw request, at most once.
#[derive(Debug, Clone)]
pub struct Responder {
    target: Arc<ReplyTarget>,
}

impl Responder {
    pub(crate) fn new(
        request_id: String,
        peer_id: String,
        event: String,
        registry: PeerRegistry,
    ) -> Self {
        Self {
            target: Arc::new(ReplyTarget {
                request_id,
                peer_id,
                event,
                registry,
                used: AtomicBool::new(false),
            }),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.target.request_id
    }

    /// Whether a response has already been attempted.
    pub fn is_used(&self) -> bool {
        self.target.used.load(Ordering::SeqCst)
    }

    /// Send `data` back to the requesting peer as a `raw.response`.
    ///
    /// A second call (from this responder or any clone) fails with
    /// [`RespondError::AlreadyResponded`].
    pub fn respond(&self, data: Value) -> Result<(), RespondError> {
        self.target.send(Frame::RawResponse(RawResponse {
            request_id: self.target.request_id.clone(),
            data: Some(data),
        }))
    }
}

/// Capability to answer one REST-shaped request, at most once.
#[derive(Debug, Clone)]
pub struct RestResponder {
    target: Arc<ReplyTarget>,
}

impl RestResponder {
    pub(crate) fn new(
        request_id: String,
        peer_id: String,
        event: String,
        registry: PeerRegistry,
    ) -> Self {
        Self {
            target: Arc::new(ReplyTarget {
                request_id,
                peer_id,
                event,
                registry,
                used: AtomicBool::new(false),
            }),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.target.request_id
    }

    pub fn is_used(&self) -> bool {
        self.target.used.load(Ordering::SeqCst)
    }

    /// Send `reply` back to the requesting peer as a `rest.response`.
    pub fn respond(&self, reply: RestReply) -> Result<(), RespondError> {
        let frame = reply.into_frame(self.target.request_id.clone());
        self.target.send(Frame::RestResponse(frame))
    }
}
