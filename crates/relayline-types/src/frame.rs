//! Wire frame types.
//!
//! Every message exchanged over the transport is a JSON object whose `type`
//! field selects one of four frame shapes. Field names are camelCase on the
//! wire. Payloads are opaque JSON values; their interpretation belongs to the
//! application.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A single header map. REST frames carry a list of these.
pub type Header = HashMap<String, String>;

/// A tagged wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Raw request, optionally addressed to a third peer for relaying.
    #[serde(rename = "raw.request")]
    RawRequest(RawRequest),
    /// Reply to a raw request.
    #[serde(rename = "raw.response")]
    RawResponse(RawResponse),
    /// REST-shaped request (path, method, headers, body).
    #[serde(rename = "rest.request")]
    RestRequest(RestRequest),
    /// Reply to a REST-shaped request.
    #[serde(rename = "rest.response")]
    RestResponse(RestResponse),
}

/// Raw request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRequest {
    /// Correlation ID.
    pub request_id: String,
    /// Final recipient when the receiver is only a relay.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<String>,
    /// Application-level event label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// Request payload.
    pub data: Value,
}

/// Raw response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawResponse {
    /// Correlation ID of the request being answered.
    pub request_id: String,
    /// Response payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// REST-shaped request frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestRequest {
    /// Correlation ID.
    pub request_id: String,
    /// Resource path, e.g. `/items/7`.
    pub path: String,
    /// HTTP-style method name.
    pub method: String,
    /// Request headers, in the order they were added.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
    /// Request body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// REST-shaped response frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestResponse {
    /// Correlation ID of the request being answered.
    pub request_id: String,
    /// HTTP-style status code.
    pub status: u16,
    /// Response headers.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<Header>,
    /// Response body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// The answer to a REST-shaped request, without its correlation ID.
///
/// Handlers produce one of these; callers of a REST request receive one.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RestReply {
    /// HTTP-style status code.
    pub status: u16,
    /// Headers to send back.
    pub headers: Vec<Header>,
    /// Body, if any.
    pub data: Option<Value>,
}

impl RestReply {
    /// A reply with the given status and no headers or body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: Vec::new(),
            data: None,
        }
    }

    /// Shorthand for a 200 reply carrying `data`.
    pub fn ok(data: Value) -> Self {
        Self::new(200).with_data(data)
    }

    /// Set the body.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Append a single-entry header map.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut header = Header::new();
        header.insert(name.into(), value.into());
        self.headers.push(header);
        self
    }

    /// True for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Attach a correlation ID, producing the frame body.
    pub fn into_frame(self, request_id: String) -> RestResponse {
        RestResponse {
            request_id,
            status: self.status,
            headers: self.headers,
            data: self.data,
        }
    }
}

impl From<RestResponse> for RestReply {
    fn from(resp: RestResponse) -> Self {
        Self {
            status: resp.status,
            headers: resp.headers,
            data: resp.data,
        }
    }
}

impl Frame {
    /// Parse a transport payload into a frame.
    pub fn decode(payload: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(payload)
    }

    /// Serialize the frame into a transport payload.
    pub fn encode(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// The correlation ID carried by any frame shape.
    pub fn request_id(&self) -> &str {
        match self {
            Frame::RawRequest(f) => &f.request_id,
            Frame::RawResponse(f) => &f.request_id,
            Frame::RestRequest(f) => &f.request_id,
            Frame::RestResponse(f) => &f.request_id,
        }
    }

    /// The wire tag of this frame.
    pub fn tag(&self) -> &'static str {
        match self {
            Frame::RawRequest(_) => "raw.request",
            Frame::RawResponse(_) => "raw.response",
            Frame::RestRequest(_) => "rest.request",
            Frame::RestResponse(_) => "rest.response",
        }
    }

    /// Whether this frame belongs to the REST family.
    pub fn is_rest(&self) -> bool {
        matches!(self, Frame::RestRequest(_) | Frame::RestResponse(_))
    }
}
