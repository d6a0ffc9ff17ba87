//! Integration tests for the ConnectionEngine correlation pipeline.
//!
//! These tests wire several real engines together through an in-process
//! link transport: emitting on one side dispatches synchronously into the
//! other. No sockets are involved.

use relayline_types::config::EngineConfig;
use relayline_types::error::{RequestError, WireError};
use relayline_types::frame::RestReply;
use relayline_wire::{
    ConnectionEngine, ConnectionHandler, ConnectionId, IncomingRequest, IncomingRestRequest,
    NoopHandler, OutboundRequest, Peer, Responder, RestCall, RestResponder, TransportHandle,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

// ---------------------------------------------------------------------------
// Link transport: connects two engines in the same process
// ---------------------------------------------------------------------------

static NEXT_CONNECTION: AtomicU64 = AtomicU64::new(1);

#[derive(Debug)]
struct Link {
    /// This side's connection identity.
    id: ConnectionId,
    /// Connection identity of the mirror link inside `remote`.
    remote_id: ConnectionId,
    remote: Weak<ConnectionEngine>,
}

impl TransportHandle for Link {
    fn connection_id(&self) -> ConnectionId {
        self.id
    }

    fn emit(&self, event: &str, payload: Value) -> Result<(), WireError> {
        let remote = self.remote.upgrade().ok_or(WireError::ConnectionClosed)?;
        remote.dispatch(self.remote_id, event, payload);
        Ok(())
    }
}

/// Connect two engines. Returns (peer for `b` inside `a`, peer for `a` inside `b`).
fn link(a: &Arc<ConnectionEngine>, b: &Arc<ConnectionEngine>) -> (Peer, Peer) {
    let a_id = ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
    let b_id = ConnectionId(NEXT_CONNECTION.fetch_add(1, Ordering::Relaxed));
    let b_in_a = a.connected(Arc::new(Link {
        id: a_id,
        remote_id: b_id,
        remote: Arc::downgrade(b),
    }));
    let a_in_b = b.connected(Arc::new(Link {
        id: b_id,
        remote_id: a_id,
        remote: Arc::downgrade(a),
    }));
    (b_in_a, a_in_b)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Answers `{x}` with `{y: x + 1}` and records what it saw.
#[derive(Default)]
struct Incrementer {
    seen: Mutex<Vec<(String, Value)>>,
}

impl ConnectionHandler for Incrementer {
    fn on_request(&self, request: IncomingRequest, responder: Responder) {
        let x = request.data["x"].as_i64().unwrap_or(0);
        self.seen
            .lock()
            .unwrap()
            .push((request.request_id.clone(), request.data));
        responder.respond(json!({"y": x + 1})).unwrap();
    }

    fn on_rest_request(&self, request: IncomingRestRequest, responder: RestResponder) {
        let reply = match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/health") => RestReply::ok(json!({"status": "ok"})),
            _ => RestReply::new(404),
        };
        responder.respond(reply).unwrap();
    }
}

/// Holds responders so the test can answer later.
#[derive(Default)]
struct Deferred {
    responders: Mutex<Vec<Responder>>,
}

impl ConnectionHandler for Deferred {
    fn on_request(&self, _request: IncomingRequest, responder: Responder) {
        self.responders.lock().unwrap().push(responder);
    }
}

fn engine(handler: Arc<dyn ConnectionHandler>) -> Arc<ConnectionEngine> {
    Arc::new(ConnectionEngine::new(EngineConfig::default(), handler))
}

type Outcomes = Arc<Mutex<Vec<Result<Value, RequestError>>>>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn test_direct_request_response() {
    let p1 = engine(Arc::new(NoopHandler));
    let p2_handler = Arc::new(Incrementer::default());
    let p2 = engine(p2_handler.clone());
    let (p2_in_p1, _) = link(&p1, &p2);

    let outcomes: Outcomes = Arc::default();
    let sink = Arc::clone(&outcomes);
    let request_id = p1
        .request(OutboundRequest::new(&p2_in_p1.id, json!({"x": 1})), move |r| {
            sink.lock().unwrap().push(r)
        })
        .unwrap();

    // The link is synchronous: the reply has already been matched.
    assert_eq!(*outcomes.lock().unwrap(), vec![Ok(json!({"y": 2}))]);
    assert_eq!(p1.pending_count(), 0);
    let seen = p2_handler.seen.lock().unwrap();
    assert_eq!(seen[0], (request_id, json!({"x": 1})));
}

#[test]
fn test_relay_through_server() {
    let server = engine(Arc::new(NoopHandler));
    let p1 = engine(Arc::new(NoopHandler));
    let p2 = engine(Arc::new(Incrementer::default()));
    let (_, server_in_p1) = link(&server, &p1);
    let (p2_in_server, _) = link(&server, &p2);

    let outcomes: Outcomes = Arc::default();
    let sink = Arc::clone(&outcomes);
    p1.request(
        OutboundRequest::new(&server_in_p1.id, json!({"x": 41})).relay_to(&p2_in_server.id),
        move |r| sink.lock().unwrap().push(r),
    )
    .unwrap();

    assert_eq!(*outcomes.lock().unwrap(), vec![Ok(json!({"y": 42}))]);
    assert_eq!(p1.pending_count(), 0);
    assert_eq!(server.relay_count(), 0);
}

#[test]
fn test_deferred_response_and_duplicate() {
    let p1 = engine(Arc::new(NoopHandler));
    let deferred = Arc::new(Deferred::default());
    let p2 = engine(deferred.clone());
    let (p2_in_p1, _) = link(&p1, &p2);

    let outcomes: Outcomes = Arc::default();
    let sink = Arc::clone(&outcomes);
    p1.request(OutboundRequest::new(&p2_in_p1.id, json!(null)), move |r| {
        sink.lock().unwrap().push(r)
    })
    .unwrap();
    assert_eq!(p1.pending_count(), 1);

    let responder = deferred.responders.lock().unwrap().pop().unwrap();
    let clone = responder.clone();
    responder.respond(json!("late")).unwrap();
    assert!(clone.respond(json!("again")).is_err());

    assert_eq!(*outcomes.lock().unwrap(), vec![Ok(json!("late"))]);
    assert_eq!(p1.pending_count(), 0);
}

#[test]
fn test_disconnect_fails_outstanding_request() {
    let p1 = engine(Arc::new(NoopHandler));
    let p2 = engine(Arc::new(Deferred::default()));
    let (p2_in_p1, _) = link(&p1, &p2);

    let outcomes: Outcomes = Arc::default();
    let sink = Arc::clone(&outcomes);
    p1.request(OutboundRequest::new(&p2_in_p1.id, json!(1)), move |r| {
        sink.lock().unwrap().push(r)
    })
    .unwrap();

    p1.disconnected(p2_in_p1.connection_id());
    assert_eq!(
        *outcomes.lock().unwrap(),
        vec![Err(RequestError::PeerDisconnected(p2_in_p1.id.clone()))]
    );
    assert!(!p1.registry().exists_with_id(&p2_in_p1.id));
}

#[test]
fn test_broadcast_reaches_every_linked_engine() {
    let server = engine(Arc::new(NoopHandler));
    let handlers: Vec<Arc<Incrementer>> = (0..3).map(|_| Arc::default()).collect();
    let clients: Vec<Arc<ConnectionEngine>> =
        handlers.iter().map(|h| engine(h.clone())).collect();
    for client in &clients {
        link(&server, client);
    }

    assert_eq!(server.broadcast(json!({"x": 0}), None), 3);
    for handler in &handlers {
        assert_eq!(handler.seen.lock().unwrap().len(), 1);
    }
    // Answers to a broadcast have no pending entry and are dropped.
    assert_eq!(server.pending_count(), 0);
}

#[tokio::test]
async fn test_rest_call_round_trip() {
    let client = engine(Arc::new(NoopHandler));
    let service = engine(Arc::new(Incrementer::default()));
    let (service_in_client, _) = link(&client, &service);

    let ok = client
        .rest_call(RestCall::new(&service_in_client.id, "GET", "/health"))
        .await
        .unwrap();
    assert!(ok.is_success());
    assert_eq!(ok.data, Some(json!({"status": "ok"})));

    let missing = client
        .rest_call(RestCall::new(&service_in_client.id, "DELETE", "/nope"))
        .await
        .unwrap();
    assert_eq!(missing.status, 404);
    assert!(!missing.is_success());
}

#[tokio::test]
async fn test_call_times_out_when_unanswered() {
    let p1 = engine(Arc::new(NoopHandler));
    let p2 = engine(Arc::new(NoopHandler));
    let (p2_in_p1, _) = link(&p1, &p2);

    let result = p1
        .call(OutboundRequest::new(&p2_in_p1.id, json!(1)).timeout(Duration::from_millis(20)))
        .await;
    assert!(matches!(result, Err(RequestError::Timeout(_))));
    assert_eq!(p1.pending_count(), 0);
}

#[test]
fn test_dropped_remote_fails_send() {
    let p1 = engine(Arc::new(NoopHandler));
    let p2 = engine(Arc::new(NoopHandler));
    let (p2_in_p1, _) = link(&p1, &p2);
    drop(p2);

    let outcomes: Outcomes = Arc::default();
    let sink = Arc::clone(&outcomes);
    let sent = p1.request(OutboundRequest::new(&p2_in_p1.id, json!(1)), move |r| {
        sink.lock().unwrap().push(r)
    });
    assert!(sent.is_none());
    assert!(matches!(
        outcomes.lock().unwrap()[0],
        Err(RequestError::Transport(_))
    ));
}
