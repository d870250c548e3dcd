//! Signaling wire protocol
//!
//! JSON envelopes exchanged with the signaling server. Three shapes exist:
//! - request: `{"request": true, "id": 1, "method": "join", "data": {...}}`
//! - response: `{"response": true, "id": 1, "ok": true, "data": {...}}` or
//!   `{"response": true, "id": 1, "ok": false, "errorCode": 500, "errorReason": "..."}`
//! - notification: `{"notification": true, "method": "peerClosed", "data": {...}}`

use super::SignalingError;
use serde::Deserialize;
use serde_json::{json, Value};

/// Error carried by a negative response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub code: u16,
    pub reason: String,
}

/// One decoded signaling envelope
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolMessage {
    Request {
        id: u64,
        method: String,
        data: Value,
    },
    Response {
        id: u64,
        result: Result<Value, Rejection>,
    },
    Notification {
        method: String,
        data: Value,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    request: bool,
    #[serde(default)]
    response: bool,
    #[serde(default)]
    notification: bool,
    id: Option<u64>,
    method: Option<String>,
    #[serde(default)]
    ok: bool,
    #[serde(default)]
    data: Value,
    error_code: Option<u16>,
    error_reason: Option<String>,
}

impl ProtocolMessage {
    /// Parse an envelope from JSON text
    pub fn from_json(text: &str) -> Result<Self, SignalingError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| SignalingError::Protocol(format!("Invalid signaling message: {}", e)))?;

        if envelope.request {
            let id = envelope
                .id
                .ok_or_else(|| SignalingError::Protocol("Request without id".to_string()))?;
            let method = envelope
                .method
                .ok_or_else(|| SignalingError::Protocol("Request without method".to_string()))?;
            return Ok(ProtocolMessage::Request {
                id,
                method,
                data: object_or_empty(envelope.data),
            });
        }

        if envelope.response {
            let id = envelope
                .id
                .ok_or_else(|| SignalingError::Protocol("Response without id".to_string()))?;
            let result = if envelope.ok {
                Ok(object_or_empty(envelope.data))
            } else {
                Err(Rejection {
                    code: envelope.error_code.unwrap_or(500),
                    reason: envelope.error_reason.unwrap_or_default(),
                })
            };
            return Ok(ProtocolMessage::Response { id, result });
        }

        if envelope.notification {
            let method = envelope.method.ok_or_else(|| {
                SignalingError::Protocol("Notification without method".to_string())
            })?;
            return Ok(ProtocolMessage::Notification {
                method,
                data: object_or_empty(envelope.data),
            });
        }

        Err(SignalingError::Protocol(format!(
            "Unknown message shape: {}",
            text.chars().take(50).collect::<String>()
        )))
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> String {
        let value = match self {
            ProtocolMessage::Request { id, method, data } => json!({
                "request": true,
                "id": id,
                "method": method,
                "data": data,
            }),
            ProtocolMessage::Response { id, result: Ok(data) } => json!({
                "response": true,
                "id": id,
                "ok": true,
                "data": data,
            }),
            ProtocolMessage::Response { id, result: Err(rejection) } => json!({
                "response": true,
                "id": id,
                "ok": false,
                "errorCode": rejection.code,
                "errorReason": rejection.reason,
            }),
            ProtocolMessage::Notification { method, data } => json!({
                "notification": true,
                "method": method,
                "data": data,
            }),
        };
        value.to_string()
    }
}

fn object_or_empty(data: Value) -> Value {
    if data.is_null() {
        json!({})
    } else {
        data
    }
}

/// Requests this endpoint sends to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    GetRouterRtpCapabilities,
    CreateWebRtcTransport,
    ConnectWebRtcTransport,
    Produce,
    Join,
    CloseProducer,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::GetRouterRtpCapabilities => "getRouterRtpCapabilities",
            RequestMethod::CreateWebRtcTransport => "createWebRtcTransport",
            RequestMethod::ConnectWebRtcTransport => "connectWebRtcTransport",
            RequestMethod::Produce => "produce",
            RequestMethod::Join => "join",
            RequestMethod::CloseProducer => "closeProducer",
        }
    }
}

/// Requests the server may send to this endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundRequestMethod {
    NewConsumer,
}

impl InboundRequestMethod {
    /// Returns None for methods without a registered handler
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "newConsumer" => Some(InboundRequestMethod::NewConsumer),
            _ => None,
        }
    }
}

/// Notifications the server may send to this endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationMethod {
    NewPeer,
    PeerClosed,
    ConsumerClosed,
    ConsumerPaused,
    ConsumerResumed,
    ProducerClosed,
    ProducerScore,
    ConsumerScore,
    ActiveSpeaker,
}

impl NotificationMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method {
            "newPeer" => Some(NotificationMethod::NewPeer),
            "peerClosed" => Some(NotificationMethod::PeerClosed),
            "consumerClosed" => Some(NotificationMethod::ConsumerClosed),
            "consumerPaused" => Some(NotificationMethod::ConsumerPaused),
            "consumerResumed" => Some(NotificationMethod::ConsumerResumed),
            "producerClosed" => Some(NotificationMethod::ProducerClosed),
            "producerScore" => Some(NotificationMethod::ProducerScore),
            "consumerScore" => Some(NotificationMethod::ConsumerScore),
            "activeSpeaker" => Some(NotificationMethod::ActiveSpeaker),
            _ => None,
        }
    }
}
