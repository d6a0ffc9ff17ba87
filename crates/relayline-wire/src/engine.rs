//! ConnectionEngine: peer lifecycle, inbound dispatch and request correlation.
//!
//! The engine sits between a transport and the application. The transport
//! reports connects, disconnects and inbound events; the engine keeps the
//! [`PeerRegistry`] in sync, classifies each inbound frame by its tag and
//! routes it to an application hook, a pending-response handler, or onward
//! to another peer.
//!
//! Nothing on the inbound path returns an error. Unknown recipients,
//! unmatched responses and malformed frames are logged at debug level and
//! dropped.
//!
//! Correlated requests carry a deadline. [`ConnectionEngine::expire_pending`]
//! (run periodically by [`ConnectionEngine::spawn_reaper`]) fails overdue
//! entries with [`RequestError::Timeout`], and a disconnect fails every
//! entry addressed to the departed peer with
//! [`RequestError::PeerDisconnected`].

use crate::handler::{
    ConnectionHandler, IncomingRequest, IncomingRestRequest, NoopHandler, Responder,
    RestResponder,
};
use crate::id::IdProvider;
use crate::pending::{
    PendingHandler, PendingResponse, PendingTable, RelayRoute, RelayTable, ResponseCallback,
    RestCallback,
};
use crate::registry::{Peer, PeerRegistry};
use crate::transport::{ConnectionId, TransportHandle};
use relayline_types::config::EngineConfig;
use relayline_types::error::{RequestError, WireError};
use relayline_types::frame::{
    Frame, Header, RawRequest, RawResponse, RestReply, RestRequest, RestResponse,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Longest deadline the engine tracks. Larger timeouts are clamped to it.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Lower bound for the expiry sweep period.
const MIN_REAP_INTERVAL: Duration = Duration::from_millis(1);

/// A raw request to send to a peer.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    /// Peer ID of the direct recipient.
    pub to: String,
    pub data: Value,
    /// Application-level event label.
    pub event: Option<String>,
    /// Ask the recipient to relay the request to this peer ID.
    pub relay_to: Option<String>,
    /// Overrides the configured request timeout.
    pub timeout: Option<Duration>,
}

impl OutboundRequest {
    /// A request for peer `to` carrying `data`, with no event label.
    pub fn new(to: impl Into<String>, data: Value) -> Self {
        Self {
            to: to.into(),
            data,
            event: None,
            relay_to: None,
            timeout: None,
        }
    }

    /// Set the application-level event label.
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = Some(event.into());
        self
    }

    /// Ask the direct recipient to forward the request to `recipient`.
    /// The reply is routed back under the same request ID.
    pub fn relay_to(mut self, recipient: impl Into<String>) -> Self {
        self.relay_to = Some(recipient.into());
        self
    }

    /// Override the configured request timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A REST-shaped request to send to a peer.
#[derive(Debug, Clone)]
pub struct RestCall {
    /// Peer ID of the recipient.
    pub to: String,
    /// Resource path.
    pub path: String,
    /// HTTP-style method name.
    pub method: String,
    /// Request headers.
    pub headers: Vec<Header>,
    /// Request body.
    pub data: Option<Value>,
    /// Overrides the configured request timeout.
    pub timeout: Option<Duration>,
}

impl RestCall {
    /// A body-less request for `method path` on peer `to`.
    pub fn new(to: impl Into<String>, method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            path: path.into(),
            method: method.into(),
            headers: Vec::new(),
            data: None,
            timeout: None,
        }
    }

    /// Append a single-entry header map.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut header = Header::new();
        header.insert(name.into(), value.into());
        self.headers.push(header);
        self
    }

    /// Set the request body.
    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Override the configured request timeout for this request.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The correlation engine. Share it behind an [`Arc`].
pub struct ConnectionEngine {
    config: EngineConfig,
    registry: PeerRegistry,
    request_ids: IdProvider,
    pending: PendingTable,
    relays: RelayTable,
    handler: Arc<dyn ConnectionHandler>,
}

impl ConnectionEngine {
    /// Create an engine with the given configuration and hooks.
    ///
    /// Invalid settings are logged; the engine still runs, with a zero reap
    /// interval raised to 1 ms.
    pub fn new(config: EngineConfig, handler: Arc<dyn ConnectionHandler>) -> Self {
        if let Err(e) = config.validate() {
            warn!(error = %e, "Engine started with invalid configuration");
        }
        Self {
            config,
            registry: PeerRegistry::new(),
            request_ids: IdProvider::new(),
            pending: PendingTable::new(),
            relays: RelayTable::new(),
            handler,
        }
    }

    /// An engine with default configuration and no hooks.
    pub fn with_defaults() -> Self {
        Self::new(EngineConfig::default(), Arc::new(NoopHandler))
    }

    /// Settings the engine was created with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The live peer registry. Clones share state with the engine.
    pub fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Snapshot of all live peers.
    pub fn peers(&self) -> Vec<Peer> {
        self.registry.all_peers()
    }

    /// Number of correlated requests awaiting a response.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Whether a correlated request is still awaiting a response.
    pub fn is_pending(&self, request_id: &str) -> bool {
        self.pending.contains(request_id)
    }

    /// Number of relayed requests whose response has not come back yet.
    pub fn relay_count(&self) -> usize {
        self.relays.len()
    }

    // ------------------------------------------------------------------
    // Transport lifecycle
    // ------------------------------------------------------------------

    /// Register the peer behind a newly opened connection.
    pub fn connected(&self, connection: Arc<dyn TransportHandle>) -> Peer {
        let conn_id = connection.connection_id();
        if let Some(existing) = self.registry.get_by_connection(conn_id) {
            warn!(
                connection = %conn_id,
                peer_id = %existing.id,
                "Connection already registered"
            );
            return existing;
        }

        let peer = self.registry.create_peer(connection);
        info!(peer_id = %peer.id, connection = %conn_id, "Peer connected");
        self.handler.on_connected(&peer);
        peer
    }

    /// Forget the peer behind a closed connection.
    ///
    /// Pending requests addressed to that peer fail with
    /// [`RequestError::PeerDisconnected`]; relay routes through it are dropped.
    pub fn disconnected(&self, conn_id: ConnectionId) {
        let Some(peer) = self.registry.remove_by_connection(conn_id) else {
            debug!(connection = %conn_id, "Disconnect for unknown connection");
            return;
        };

        let orphaned = self.pending.take_for_peer(&peer.id);
        let dropped_routes = self.relays.remove_for_peer(&peer.id);
        info!(
            peer_id = %peer.id,
            connection = %conn_id,
            orphaned = orphaned.len(),
            dropped_routes,
            "Peer disconnected"
        );
        for entry in orphaned {
            entry
                .handler
                .fail(RequestError::PeerDisconnected(peer.id.clone()));
        }
        self.handler.on_disconnected(&peer);
    }

    // ------------------------------------------------------------------
    // Inbound dispatch
    // ------------------------------------------------------------------

    /// Handle one inbound event from a connection.
    pub fn dispatch(&self, conn_id: ConnectionId, event: &str, payload: Value) {
        if event != self.config.raw_event && event != self.config.rest_event {
            debug!(connection = %conn_id, event, "Ignoring unsubscribed event");
            return;
        }
        let Some(peer) = self.registry.get_by_connection(conn_id) else {
            debug!(connection = %conn_id, "Frame from unregistered connection");
            return;
        };
        let frame = match Frame::decode(payload) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(peer_id = %peer.id, error = %e, "Dropping malformed frame");
                return;
            }
        };
        let expected_event = if frame.is_rest() {
            &self.config.rest_event
        } else {
            &self.config.raw_event
        };
        if event != expected_event {
            debug!(
                peer_id = %peer.id,
                event,
                tag = frame.tag(),
                "Frame arrived on the wrong event"
            );
            return;
        }

        match frame {
            Frame::RawRequest(req) => self.handle_raw_request(&peer, req),
            Frame::RawResponse(resp) => self.handle_raw_response(&peer, resp),
            Frame::RestRequest(req) => self.handle_rest_request(&peer, req),
            Frame::RestResponse(resp) => self.handle_rest_response(&peer, resp),
        }
    }

    fn handle_raw_request(&self, from: &Peer, req: RawRequest) {
        if let Some(recipient_id) = req.recipient_id.clone().filter(|id| !id.is_empty()) {
            self.relay(from, &recipient_id, req);
            return;
        }

        let responder = Responder::new(
            req.request_id.clone(),
            from.id.clone(),
            self.config.raw_event.clone(),
            self.registry.clone(),
        );
        self.handler.on_request(
            IncomingRequest {
                request_id: req.request_id,
                from: from.clone(),
                event: req.event,
                data: req.data,
            },
            responder,
        );
    }

    /// Forward a request to its named recipient, keeping its request ID so the
    /// recipient's response can be routed back to the origin.
    fn relay(&self, from: &Peer, recipient_id: &str, req: RawRequest) {
        let Some(recipient) = self.registry.get_by_id(recipient_id) else {
            debug!(
                request_id = %req.request_id,
                recipient_id,
                "Relay target unknown, dropping request"
            );
            return;
        };

        let request_id = req.request_id.clone();
        let route = RelayRoute {
            origin: from.id.clone(),
            target: recipient.id.clone(),
            deadline: self.deadline(None),
        };
        if !self.relays.insert(request_id.clone(), route) {
            debug!(
                request_id = %request_id,
                from = %from.id,
                "Relay already in flight for this request ID, dropping request"
            );
            return;
        }
        let frame = Frame::RawRequest(RawRequest {
            recipient_id: None,
            ..req
        });
        match self.emit(&recipient, &self.config.raw_event, &frame) {
            Ok(()) => debug!(
                request_id = %request_id,
                from = %from.id,
                to = %recipient.id,
                "Relayed request"
            ),
            Err(e) => {
                self.relays.remove(&request_id);
                warn!(request_id = %request_id, to = %recipient.id, error = %e, "Relay failed");
            }
        }
    }

    fn handle_raw_response(&self, from: &Peer, resp: RawResponse) {
        if let Some(callback) = self.pending.take_raw(&resp.request_id) {
            debug!(request_id = %resp.request_id, peer_id = %from.id, "Response matched");
            callback(Ok(resp.data.unwrap_or(Value::Null)));
            return;
        }

        if let Some(route) = self.relays.take_answered_by(&resp.request_id, &from.id) {
            let Some(origin) = self.registry.get_by_id(&route.origin) else {
                debug!(request_id = %resp.request_id, "Relay origin gone, dropping response");
                return;
            };
            if let Err(e) = self.emit(&origin, &self.config.raw_event, &Frame::RawResponse(resp)) {
                warn!(to = %origin.id, error = %e, "Failed to forward relayed response");
            }
            return;
        }

        debug!(
            request_id = %resp.request_id,
            peer_id = %from.id,
            "Dropping unmatched response"
        );
    }

    fn handle_rest_request(&self, from: &Peer, req: RestRequest) {
        let responder = RestResponder::new(
            req.request_id.clone(),
            from.id.clone(),
            self.config.rest_event.clone(),
            self.registry.clone(),
        );
        self.handler.on_rest_request(
            IncomingRestRequest {
                request_id: req.request_id,
                from: from.clone(),
                path: req.path,
                method: req.method,
                headers: req.headers,
                data: req.data,
            },
            responder,
        );
    }

    fn handle_rest_response(&self, from: &Peer, resp: RestResponse) {
        match self.pending.take_rest(&resp.request_id) {
            Some(callback) => callback(Ok(RestReply::from(resp))),
            None => debug!(
                request_id = %resp.request_id,
                peer_id = %from.id,
                "Dropping unmatched REST response"
            ),
        }
    }

    // ------------------------------------------------------------------
    // Outbound operations
    // ------------------------------------------------------------------

    /// Fire-and-forget request. Returns false if the peer is unknown or the
    /// transport refused the frame.
    pub fn send(&self, to: &str, data: Value) -> bool {
        self.send_request(OutboundRequest::new(to, data), None)
            .is_some()
    }

    /// Send a request and run `callback` exactly once with its outcome.
    ///
    /// Returns the request ID, or `None` when the recipient is unknown (the
    /// callback is dropped without running and nothing is registered) or
    /// the transport refused the frame (the callback receives
    /// [`RequestError::Transport`]).
    pub fn request<F>(&self, request: OutboundRequest, callback: F) -> Option<String>
    where
        F: FnOnce(Result<Value, RequestError>) + Send + Sync + 'static,
    {
        self.send_request(request, Some(Box::new(callback)))
    }

    /// Send a request without a callback. Equivalent to [`send`](Self::send)
    /// with the extra options of [`OutboundRequest`].
    pub fn notify(&self, request: OutboundRequest) -> Option<String> {
        self.send_request(request, None)
    }

    fn send_request(
        &self,
        request: OutboundRequest,
        callback: Option<ResponseCallback>,
    ) -> Option<String> {
        let Some(recipient) = self.registry.get_by_id(&request.to) else {
            debug!(to = %request.to, "Dropping request to unknown peer");
            return None;
        };

        let request_id = self.request_ids.next_id();
        // Register before emitting so a fast response always finds its handler.
        if let Some(callback) = callback {
            self.pending.insert(PendingResponse {
                request_id: request_id.clone(),
                peer_id: recipient.id.clone(),
                deadline: self.deadline(request.timeout),
                handler: PendingHandler::Raw(callback),
            });
        }

        let frame = Frame::RawRequest(RawRequest {
            request_id: request_id.clone(),
            recipient_id: request.relay_to,
            event: request.event,
            data: request.data,
        });
        if let Err(e) = self.emit(&recipient, &self.config.raw_event, &frame) {
            self.fail_unsent(&request_id, &recipient, e);
            return None;
        }
        Some(request_id)
    }

    /// Send a request and wait for its response.
    ///
    /// Resolves with [`RequestError::Timeout`] once the request deadline
    /// passes, even if no reaper task is running.
    pub async fn call(&self, request: OutboundRequest) -> Result<Value, RequestError> {
        let to = request.to.clone();
        let timeout = request.timeout.unwrap_or(self.config.request_timeout());
        let (tx, rx) = oneshot::channel();
        let Some(request_id) = self.request(request, move |result| {
            let _ = tx.send(result);
        }) else {
            // Either the callback already saw a transport error or it was
            // dropped because the recipient is unknown.
            return rx
                .await
                .unwrap_or(Err(RequestError::UnknownRecipient(to)));
        };
        self.await_reply(request_id, timeout, rx).await
    }

    /// Send a REST-shaped request and run `callback` exactly once with its outcome.
    pub fn rest_request<F>(&self, call: RestCall, callback: F) -> Option<String>
    where
        F: FnOnce(Result<RestReply, RequestError>) + Send + Sync + 'static,
    {
        self.send_rest_request(call, Box::new(callback))
    }

    fn send_rest_request(&self, call: RestCall, callback: RestCallback) -> Option<String> {
        let Some(recipient) = self.registry.get_by_id(&call.to) else {
            debug!(to = %call.to, "Dropping REST request to unknown peer");
            return None;
        };

        let request_id = self.request_ids.next_id();
        self.pending.insert(PendingResponse {
            request_id: request_id.clone(),
            peer_id: recipient.id.clone(),
            deadline: self.deadline(call.timeout),
            handler: PendingHandler::Rest(callback),
        });

        let frame = Frame::RestRequest(RestRequest {
            request_id: request_id.clone(),
            path: call.path,
            method: call.method,
            headers: call.headers,
            data: call.data,
        });
        if let Err(e) = self.emit(&recipient, &self.config.rest_event, &frame) {
            self.fail_unsent(&request_id, &recipient, e);
            return None;
        }
        Some(request_id)
    }

    /// Send a REST-shaped request and wait for its response.
    pub async fn rest_call(&self, call: RestCall) -> Result<RestReply, RequestError> {
        let to = call.to.clone();
        let timeout = call.timeout.unwrap_or(self.config.request_timeout());
        let (tx, rx) = oneshot::channel();
        let Some(request_id) = self.rest_request(call, move |result| {
            let _ = tx.send(result);
        }) else {
            return rx
                .await
                .unwrap_or(Err(RequestError::UnknownRecipient(to)));
        };
        self.await_reply(request_id, timeout, rx).await
    }

    async fn await_reply<T>(
        &self,
        request_id: String,
        timeout: Duration,
        rx: oneshot::Receiver<Result<T, RequestError>>,
    ) -> Result<T, RequestError> {
        match tokio::time::timeout(timeout.min(FAR_FUTURE), rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RequestError::Shutdown),
            Err(_) => {
                // The handler may have been taken concurrently; then its
                // outcome is already lost with the receiver.
                self.pending.take(&request_id);
                Err(RequestError::Timeout(request_id))
            }
        }
    }

    /// Answer a request received from `to`. No state is kept after sending.
    pub fn respond(&self, to: &str, request_id: &str, data: Value) -> bool {
        let frame = Frame::RawResponse(RawResponse {
            request_id: request_id.to_string(),
            data: Some(data),
        });
        self.emit_to(to, &self.config.raw_event, &frame)
    }

    /// Answer a REST-shaped request received from `to`.
    pub fn rest_respond(&self, to: &str, request_id: &str, reply: RestReply) -> bool {
        let frame = Frame::RestResponse(reply.into_frame(request_id.to_string()));
        self.emit_to(to, &self.config.rest_event, &frame)
    }

    /// Send `data` to every live peer. A failure for one peer does not stop
    /// the others. Returns how many frames were handed to the transport.
    pub fn broadcast(&self, data: Value, event: Option<&str>) -> usize {
        let peers = self.registry.all_peers();
        let total = peers.len();
        let delivered = peers
            .into_iter()
            .filter(|peer| {
                let mut request = OutboundRequest::new(peer.id.clone(), data.clone());
                request.event = event.map(str::to_string);
                self.send_request(request, None).is_some()
            })
            .count();
        if delivered < total {
            warn!(delivered, total, "Broadcast partially delivered");
        }
        delivered
    }

    // ------------------------------------------------------------------
    // Expiry and shutdown
    // ------------------------------------------------------------------

    /// Fail every pending request whose deadline has passed.
    pub fn expire_pending(&self) -> usize {
        self.expire_pending_at(Instant::now())
    }

    /// Fail every pending request whose deadline is at or before `now`, and
    /// drop stale relay routes. Returns the number of failed requests.
    pub fn expire_pending_at(&self, now: Instant) -> usize {
        let expired = self.pending.take_expired(now);
        let routes = self.relays.remove_expired(now);
        let count = expired.len();
        if count > 0 || routes > 0 {
            debug!(expired = count, routes, "Expired pending requests");
        }
        for entry in expired {
            entry.handler.fail(RequestError::Timeout(entry.request_id));
        }
        count
    }

    /// Spawn a task that runs [`expire_pending`](Self::expire_pending) every
    /// `reap_interval` (at least 1 ms). The task stops once the engine is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        let period = self.config.reap_interval().max(MIN_REAP_INTERVAL);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.expire_pending();
            }
        })
    }

    /// Fail every pending request with [`RequestError::Shutdown`] and drop
    /// all relay routes. Peers stay registered.
    pub fn shutdown(&self) {
        let drained = self.pending.drain();
        info!(pending = drained.len(), "Engine shutting down");
        for entry in drained {
            entry.handler.fail(RequestError::Shutdown);
        }
        self.relays.clear();
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn deadline(&self, timeout: Option<Duration>) -> Instant {
        deadline_after(
            Instant::now(),
            timeout.unwrap_or(self.config.request_timeout()),
        )
    }

    fn emit(&self, peer: &Peer, event: &str, frame: &Frame) -> Result<(), WireError> {
        let payload = frame.encode()?;
        peer.connection.emit(event, payload)
    }

    fn emit_to(&self, to: &str, event: &str, frame: &Frame) -> bool {
        let Some(peer) = self.registry.get_by_id(to) else {
            debug!(to, request_id = frame.request_id(), "Dropping frame to unknown peer");
            return false;
        };
        match self.emit(&peer, event, frame) {
            Ok(()) => true,
            Err(e) => {
                warn!(to, error = %e, "Failed to emit {}", frame.tag());
                false
            }
        }
    }

    fn fail_unsent(&self, request_id: &str, recipient: &Peer, err: WireError) {
        warn!(
            request_id,
            to = %recipient.id,
            error = %err,
            "Failed to emit request"
        );
        if let Some(entry) = self.pending.take(request_id) {
            entry.handler.fail(RequestError::Transport(err.to_string()));
        }
    }
}

/// `now + timeout`, with the timeout clamped to [`FAR_FUTURE`].
fn deadline_after(now: Instant, timeout: Duration) -> Instant {
    now + timeout.min(FAR_FUTURE)
}

impl Drop for ConnectionEngine {
    fn drop(&mut self) {
        for entry in self.pending.drain() {
            entry.handler.fail(RequestError::Shutdown);
        }
    }
}
