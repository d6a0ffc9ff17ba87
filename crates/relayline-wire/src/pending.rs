//! Waiting list of correlated requests and relay routes.
//!
//! Each entry is removed before its handler runs, so a handler is invoked at
//! most once no matter how many responses, timeouts or disconnects race for
//! it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use relayline_types::error::RequestError;
use relayline_types::frame::RestReply;
use serde_json::Value;
use std::time::Instant;

/// Callback for a raw request's reply.
pub type ResponseCallback = Box<dyn FnOnce(Result<Value, RequestError>) + Send + Sync + 'static>;

/// Callback for a REST request's reply.
pub type RestCallback = Box<dyn FnOnce(Result<RestReply, RequestError>) + Send + Sync + 'static>;

/// What to run when the request settles.
pub enum PendingHandler {
    Raw(ResponseCallback),
    Rest(RestCallback),
}

impl PendingHandler {
    /// Settle the request with an error.
    pub fn fail(self, err: RequestError) {
        match self {
            PendingHandler::Raw(cb) => cb(Err(err)),
            PendingHandler::Rest(cb) => cb(Err(err)),
        }
    }
}

impl std::fmt::Debug for PendingHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PendingHandler::Raw(_) => f.write_str("Raw(..)"),
            PendingHandler::Rest(_) => f.write_str("Rest(..)"),
        }
    }
}

/// An outstanding correlated request.
#[derive(Debug)]
pub struct PendingResponse {
    pub request_id: String,
    /// Peer the request was sent to.
    pub peer_id: String,
    pub deadline: Instant,
    pub handler: PendingHandler,
}

/// Table of outstanding requests keyed by request ID.
#[derive(Debug, Default)]
pub struct PendingTable {
    entries: DashMap<String, PendingResponse>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: PendingResponse) {
        self.entries.insert(entry.request_id.clone(), entry);
    }

    /// Remove an entry regardless of its kind.
    pub fn take(&self, request_id: &str) -> Option<PendingResponse> {
        self.entries.remove(request_id).map(|(_, entry)| entry)
    }

    /// Remove a raw entry. REST entries with the same ID stay in place.
    pub fn take_raw(&self, request_id: &str) -> Option<ResponseCallback> {
        let (_, entry) = self
            .entries
            .remove_if(request_id, |_, e| matches!(e.handler, PendingHandler::Raw(_)))?;
        match entry.handler {
            PendingHandler::Raw(cb) => Some(cb),
            PendingHandler::Rest(_) => None,
        }
    }

    /// Remove a REST entry. Raw entries with the same ID stay in place.
    pub fn take_rest(&self, request_id: &str) -> Option<RestCallback> {
        let (_, entry) = self
            .entries
            .remove_if(request_id, |_, e| matches!(e.handler, PendingHandler::Rest(_)))?;
        match entry.handler {
            PendingHandler::Rest(cb) => Some(cb),
            PendingHandler::Raw(_) => None,
        }
    }

    /// Remove every entry whose deadline is at or before `now`.
    pub fn take_expired(&self, now: Instant) -> Vec<PendingResponse> {
        let overdue: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.deadline <= now)
            .map(|e| e.key().clone())
            .collect();
        overdue
            .iter()
            .filter_map(|id| self.entries.remove_if(id, |_, e| e.deadline <= now))
            .map(|(_, entry)| entry)
            .collect()
    }

    /// Remove every entry addressed to `peer_id`.
    pub fn take_for_peer(&self, peer_id: &str) -> Vec<PendingResponse> {
        let addressed: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.peer_id == peer_id)
            .map(|e| e.key().clone())
            .collect();
        addressed
            .iter()
            .filter_map(|id| self.entries.remove(id))
            .map(|(_, entry)| entry)
            .collect()
    }

    /// Remove everything.
    pub fn drain(&self) -> Vec<PendingResponse> {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.iter()
            .filter_map(|id| self.entries.remove(id))
            .map(|(_, entry)| entry)
            .collect()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.entries.contains_key(request_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Where to send the response to a relayed request.
#[derive(Debug, Clone)]
pub struct RelayRoute {
    /// Peer that sent the original request.
    pub origin: String,
    /// Peer the request was forwarded to; only its response is accepted.
    pub target: String,
    pub deadline: Instant,
}

/// Relay routes keyed by the preserved request ID.
#[derive(Debug, Default)]
pub struct RelayTable {
    routes: DashMap<String, RelayRoute>,
}

impl RelayTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a route unless one already exists for `request_id`.
    /// Returns false, leaving the existing route in place, on a clash.
    pub fn insert(&self, request_id: String, route: RelayRoute) -> bool {
        match self.routes.entry(request_id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(route);
                true
            }
        }
    }

    pub fn remove(&self, request_id: &str) -> Option<RelayRoute> {
        self.routes.remove(request_id).map(|(_, route)| route)
    }

    /// Remove the route only if `responder` is the peer the request was forwarded to.
    pub fn take_answered_by(&self, request_id: &str, responder: &str) -> Option<RelayRoute> {
        self.routes
            .remove_if(request_id, |_, route| route.target == responder)
            .map(|(_, route)| route)
    }

    /// Drop routes past their deadline. Returns how many were dropped.
    pub fn remove_expired(&self, now: Instant) -> usize {
        let before = self.routes.len();
        self.routes.retain(|_, route| route.deadline > now);
        before.saturating_sub(self.routes.len())
    }

    /// Drop routes that start or end at `peer_id`.
    pub fn remove_for_peer(&self, peer_id: &str) -> usize {
        let before = self.routes.len();
        self.routes
            .retain(|_, route| route.origin != peer_id && route.target != peer_id);
        before.saturating_sub(self.routes.len())
    }

    pub fn clear(&self) {
        self.routes.clear();
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
