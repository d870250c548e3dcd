//! Media engine seams
//!
//! The engine that actually encodes, sends and receives media lives outside
//! this crate. The room drives it through these traits and answers the
//! events it raises (DTLS connect, produce) over the signaling channel.

use super::{Encoding, LocalTrack, MediaError, MediaKind};
use crate::config::IceServer;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Direction of a media transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportDirection {
    Send,
    Recv,
}

/// Connection state reported by a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Server-assigned transport parameters (`createWebRtcTransport` response)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParameters {
    pub id: String,
    #[serde(default)]
    pub ice_parameters: Value,
    #[serde(default)]
    pub ice_candidates: Value,
    #[serde(default)]
    pub dtls_parameters: Value,
    #[serde(default)]
    pub sctp_parameters: Option<Value>,
}

/// Everything the engine needs to build a local transport
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub parameters: TransportParameters,
    pub ice_servers: Vec<IceServer>,
}

/// Events a local transport raises for the signaling side to answer
#[derive(Debug)]
pub enum TransportEvent {
    /// DTLS parameters must reach the server before media can flow
    Connect {
        dtls_parameters: Value,
        reply: oneshot::Sender<Result<(), String>>,
    },
    /// A new producer needs a server-side id (send transports only)
    Produce {
        kind: MediaKind,
        rtp_parameters: Value,
        app_data: Value,
        reply: oneshot::Sender<Result<String, String>>,
    },
    ConnectionStateChange(ConnectionState),
}

/// A freshly built transport and its event stream
pub struct TransportHandle {
    pub transport: Arc<dyn MediaTransport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

/// Parameters for producing a local track
#[derive(Clone)]
pub struct ProduceOptions {
    pub track: Arc<dyn LocalTrack>,
    pub encodings: Vec<Encoding>,
    pub codec_options: Value,
    pub app_data: Value,
}

/// Events raised by a producer after creation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerEvent {
    /// The owning transport closed
    TransportClosed,
    /// The bound capture track ended
    TrackEnded,
}

pub trait MediaProducer: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn close(&self);
}

/// A producer and its event stream
pub struct ProducerHandle {
    pub producer: Arc<dyn MediaProducer>,
    pub events: mpsc::UnboundedReceiver<ProducerEvent>,
}

/// Body of a `newConsumer` request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeOptions {
    pub id: String,
    pub producer_id: String,
    pub kind: MediaKind,
    #[serde(default)]
    pub rtp_parameters: Value,
    #[serde(default)]
    pub app_data: Value,
    #[serde(default)]
    pub peer_id: Option<String>,
    #[serde(default, rename = "type")]
    pub consumer_type: Option<String>,
    #[serde(default)]
    pub producer_paused: bool,
}

pub trait MediaConsumer: Send + Sync {
    fn id(&self) -> &str;
    fn producer_id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    fn close(&self);
}

pub type ConsumerHandle = Arc<dyn MediaConsumer>;

/// A negotiated media transport
#[async_trait]
pub trait MediaTransport: Send + Sync {
    fn id(&self) -> &str;

    fn direction(&self) -> TransportDirection;

    /// Start sending a local track. Send transports only.
    async fn produce(&self, options: ProduceOptions) -> Result<ProducerHandle, MediaError>;

    /// Start receiving a remote producer. Receive transports only.
    async fn consume(&self, options: ConsumeOptions) -> Result<ConsumerHandle, MediaError>;

    fn close(&self);
}

/// Local endpoint's media capabilities
#[async_trait]
pub trait CapabilityDevice: Send + Sync {
    /// Load router capabilities. Must happen once, before anything else.
    async fn load(&self, router_rtp_capabilities: Value) -> Result<(), MediaError>;

    fn loaded(&self) -> bool;

    /// Capabilities sent to the server when joining
    fn rtp_capabilities(&self) -> Value;

    fn can_produce(&self, kind: MediaKind) -> bool;

    fn create_send_transport(&self, options: TransportOptions) -> Result<TransportHandle, MediaError>;

    fn create_recv_transport(&self, options: TransportOptions) -> Result<TransportHandle, MediaError>;
}
