//! Signaling layer
//!
//! This module provides the channel to the signaling server:
//! - Wire protocol (requests, responses, notifications)
//! - The `SignalingChannel` / `SignalingConnector` seams used by the room
//! - A WebSocket transport

pub mod protocol;
pub mod websocket;

pub use protocol::{InboundRequestMethod, NotificationMethod, ProtocolMessage, Rejection, RequestMethod};
pub use websocket::WebSocketConnector;

use async_trait::async_trait;
use log::debug;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Signaling-related errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The remote peer rejected a request
    Rejected { code: u16, reason: String },
    /// No response arrived in time
    Timeout(String),
    /// The channel is closed
    Closed,
    /// Malformed message
    Protocol(String),
    /// Connection could not be established
    Connection(String),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::Rejected { code, reason } => {
                write!(f, "Request rejected ({}): {}", code, reason)
            }
            SignalingError::Timeout(method) => write!(f, "Request timed out: {}", method),
            SignalingError::Closed => write!(f, "Signaling channel closed"),
            SignalingError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SignalingError::Connection(msg) => write!(f, "Connection failed: {}", msg),
        }
    }
}

impl Error for SignalingError {}

/// Handle used to answer one inbound request
#[derive(Debug)]
pub struct Responder {
    id: u64,
    outbound: mpsc::UnboundedSender<ProtocolMessage>,
}

impl Responder {
    pub fn new(id: u64, outbound: mpsc::UnboundedSender<ProtocolMessage>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Accept the request with a response body
    pub fn accept(self, data: Value) {
        self.send(Ok(data));
    }

    /// Reject the request with an error code and reason
    pub fn reject(self, code: u16, reason: impl Into<String>) {
        self.send(Err(Rejection {
            code,
            reason: reason.into(),
        }));
    }

    fn send(self, result: Result<Value, Rejection>) {
        let id = self.id;
        if self.outbound.send(ProtocolMessage::Response { id, result }).is_err() {
            debug!("Dropping response to request {}: channel closed", id);
        }
    }
}

/// Request received from the signaling server
#[derive(Debug)]
pub struct InboundRequest {
    pub method: String,
    pub data: Value,
    pub responder: Responder,
}

/// Notification received from the signaling server
#[derive(Debug, Clone)]
pub struct InboundNotification {
    pub method: String,
    pub data: Value,
}

/// Lifecycle and traffic events raised by a signaling channel
#[derive(Debug)]
pub enum SignalingEvent {
    /// Channel is open and requests may be sent
    Open,
    /// Connection dropped but the transport is retrying. Only raised by
    /// reconnecting transports; `WebSocketChannel` never retries.
    Disconnected,
    /// The connection broke with an error. `Closed` follows.
    Failed,
    /// Channel is closed for good
    Closed,
    Request(InboundRequest),
    Notification(InboundNotification),
}

/// Bidirectional request/notification channel to the signaling server
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Send a request and wait for its response
    async fn request(&self, method: &str, data: Value) -> Result<Value, SignalingError>;

    /// Send a fire-and-forget notification
    async fn notify(&self, method: &str, data: Value) -> Result<(), SignalingError>;

    /// Close the channel. Pending requests fail with `Closed`.
    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// An opened channel and the stream of its events
pub struct SignalingSession {
    pub channel: Arc<dyn SignalingChannel>,
    pub events: mpsc::UnboundedReceiver<SignalingEvent>,
}

/// Opens signaling channels
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<SignalingSession, SignalingError>;
}

/// Build the signaling endpoint for a room and peer
pub fn signaling_url(base: &str, room_id: &str, peer_id: &str) -> Result<Url, SignalingError> {
    let mut url = Url::parse(base)
        .map_err(|e| SignalingError::Connection(format!("Invalid signaling url {}: {}", base, e)))?;
    url.query_pairs_mut()
        .append_pair("roomId", room_id)
        .append_pair("peerId", peer_id);
    Ok(url)
}
