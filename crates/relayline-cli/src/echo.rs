//! Echo handler used by `relayline serve`.

use relayline_types::frame::RestReply;
use relayline_wire::{
    ConnectionHandler, IncomingRequest, IncomingRestRequest, Peer, Responder, RestResponder,
};
use serde_json::json;
use tracing::{info, warn};

/// Answers raw requests with their own data and REST requests with a 200
/// describing what was received. The `whoami` event answers with the
/// caller's peer ID instead.
pub struct EchoHandler;

impl ConnectionHandler for EchoHandler {
    fn on_connected(&self, peer: &Peer) {
        info!(peer_id = %peer.id, "Client joined");
    }

    fn on_disconnected(&self, peer: &Peer) {
        info!(peer_id = %peer.id, "Client left");
    }

    fn on_request(&self, request: IncomingRequest, responder: Responder) {
        let reply = match request.event.as_deref() {
            Some("whoami") => json!({ "peerId": request.from.id }),
            _ => request.data,
        };
        if let Err(e) = responder.respond(reply) {
            warn!(request_id = %request.request_id, error = %e, "Echo failed");
        }
    }

    fn on_rest_request(&self, request: IncomingRestRequest, responder: RestResponder) {
        let reply = RestReply::ok(json!({
            "path": request.path,
            "method": request.method,
            "data": request.data,
        }))
        .with_header("x-relayline-echo", "1");
        if let Err(e) = responder.respond(reply) {
            warn!(request_id = %request.request_id, error = %e, "REST echo failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relayline_types::config::EngineConfig;
    use relayline_types::frame::Frame;
    use relayline_wire::{ConnectionEngine, MemoryConnection, TransportHandle};
    use std::sync::Arc;

    fn engine() -> ConnectionEngine {
        ConnectionEngine::new(EngineConfig::default(), Arc::new(EchoHandler))
    }

    #[test]
    fn test_echoes_raw_data() {
        let engine = engine();
        let conn = MemoryConnection::new(1);
        engine.connected(conn.clone());

        engine.dispatch(
            conn.connection_id(),
            "connection.event",
            json!({"type": "raw.request", "requestId": "7-x", "data": {"x": 1}}),
        );
        match conn.take_frames().as_slice() {
            [Frame::RawResponse(resp)] => {
                assert_eq!(resp.request_id, "7-x");
                assert_eq!(resp.data, Some(json!({"x": 1})));
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn test_whoami() {
        let engine = engine();
        let conn = MemoryConnection::new(1);
        let peer = engine.connected(conn.clone());

        engine.dispatch(
            conn.connection_id(),
            "connection.event",
            json!({"type": "raw.request", "requestId": "1-a", "event": "whoami", "data": null}),
        );
        match conn.take_frames().as_slice() {
            [Frame::RawResponse(resp)] => {
                assert_eq!(resp.data, Some(json!({"peerId": peer.id})));
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }

    #[test]
    fn test_rest_echo() {
        let engine = engine();
        let conn = MemoryConnection::new(1);
        engine.connected(conn.clone());

        engine.dispatch(
            conn.connection_id(),
            "connection.event",
            json!({
                "type": "rest.request",
                "requestId": "2-b",
                "path": "/things",
                "method": "POST",
                "data": [1, 2]
            }),
        );
        match conn.take_frames().as_slice() {
            [Frame::RestResponse(resp)] => {
                assert_eq!(resp.status, 200);
                assert_eq!(
                    resp.data,
                    Some(json!({"path": "/things", "method": "POST", "data": [1, 2]}))
                );
                assert_eq!(resp.headers[0]["x-relayline-echo"], "1");
            }
            other => panic!("unexpected frames: {other:?}"),
        }
    }
}
