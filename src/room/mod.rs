//! Room session controller
//!
//! A `Room` owns one signaling channel, the capability device, the send and
//! receive transports, and the local producers and remote consumers. It runs
//! the join sequence when the channel opens and reacts to inbound requests
//! and notifications for the rest of the session.

mod consumers;
mod handlers;
mod producers;
mod transports;

pub use consumers::{ConsumerInfo, ConsumerSet};
pub use producers::ProducerInfo;
pub use transports::TransportInfo;

use crate::config::{Config, MediaConfig};
use crate::media::{CapabilityDevice, CaptureFacility, MediaError, WebcamInventory};
use crate::signaling::{
    signaling_url, RequestMethod, SignalingChannel, SignalingConnector, SignalingError,
    SignalingEvent,
};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use producers::ActiveProducer;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use transports::TransportEntry;

/// Room-level errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomError {
    /// Required session identifiers are missing or invalid
    Configuration(String),
    /// A signaling request failed or was rejected
    Signaling(SignalingError),
    /// The media engine or capture facility failed
    Media(MediaError),
    /// No video input device is available
    NoWebcam,
    /// Inbound request names a method without a handler
    UnknownMethod(String),
    /// Operation not allowed in the current state
    InvalidState(String),
    /// The room has been closed
    Closed,
}

impl fmt::Display for RoomError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoomError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            RoomError::Signaling(e) => write!(f, "Signaling error: {}", e),
            RoomError::Media(e) => write!(f, "Media error: {}", e),
            RoomError::NoWebcam => write!(f, "No webcam devices"),
            RoomError::UnknownMethod(method) => write!(f, "unknown request.method \"{}\"", method),
            RoomError::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            RoomError::Closed => write!(f, "Room is closed"),
        }
    }
}

impl Error for RoomError {}

impl From<SignalingError> for RoomError {
    fn from(e: SignalingError) -> Self {
        RoomError::Signaling(e)
    }
}

impl From<MediaError> for RoomError {
    fn from(e: MediaError) -> Self {
        RoomError::Media(e)
    }
}

/// Session lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomState {
    /// Signaling channel opening, join not started
    Connecting,
    /// Join sequence running
    Joining,
    /// Joined and producing (as far as local devices allow)
    Joined,
    /// Join aborted; the room can still be closed
    Failed(RoomError),
    Closed,
}

impl RoomState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomState::Connecting => "connecting",
            RoomState::Joining => "joining",
            RoomState::Joined => "joined",
            RoomState::Failed(_) => "failed",
            RoomState::Closed => "closed",
        }
    }
}

/// Identifiers for one session
#[derive(Debug, Clone, Default)]
pub struct RoomOptions {
    pub room_id: String,
    pub peer_id: String,
    /// Overrides the configured display name
    pub display_name: Option<String>,
}

impl RoomOptions {
    pub fn new(room_id: impl Into<String>, peer_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            peer_id: peer_id.into(),
            display_name: None,
        }
    }

    fn validate(&self) -> Result<(), RoomError> {
        if self.room_id.trim().is_empty() || self.peer_id.trim().is_empty() {
            return Err(RoomError::Configuration(
                "Missing roomId or peerId".to_string(),
            ));
        }
        Ok(())
    }
}

/// The external media engine handed to a room
#[derive(Clone)]
pub struct MediaEngine {
    pub device: Arc<dyn CapabilityDevice>,
    pub capture: Arc<dyn CaptureFacility>,
}

/// A remote participant as announced by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub device: Option<Value>,
}

/// Outcome of a completed join sequence
#[derive(Debug, Clone)]
pub struct JoinReport {
    /// Peers already in the room at join time
    pub peers: Vec<PeerInfo>,
    /// Microphone half of the last step; failure here is not fatal
    pub mic: Result<(), RoomError>,
    /// Webcam half of the last step; failure here is not fatal
    pub webcam: Result<(), RoomError>,
}

/// Serialisable view of a room for display
#[derive(Debug, Clone, Serialize)]
pub struct RoomSnapshot {
    pub room_id: String,
    pub peer_id: String,
    pub state: &'static str,
    pub closed: bool,
    pub send_transport: Option<TransportInfo>,
    pub recv_transport: Option<TransportInfo>,
    pub mic: Option<ProducerInfo>,
    pub webcam: Option<ProducerInfo>,
    pub consumers: Vec<ConsumerInfo>,
    pub webcams: WebcamInventory,
    pub peers: Vec<PeerInfo>,
}

/// One media room session
pub struct Room {
    room_id: String,
    peer_id: String,
    display_name: String,
    media: MediaConfig,
    signaling: Arc<dyn SignalingChannel>,
    device: Arc<dyn CapabilityDevice>,
    capture: Arc<dyn CaptureFacility>,
    closed: AtomicBool,
    state: watch::Sender<RoomState>,
    /// Serialise device load and transport negotiation per direction
    device_lock: tokio::sync::Mutex<()>,
    send_lock: tokio::sync::Mutex<()>,
    recv_lock: tokio::sync::Mutex<()>,
    send_transport: Mutex<Option<TransportEntry>>,
    recv_transport: Mutex<Option<TransportEntry>>,
    /// Serialise enable/disable per producer kind
    mic_lock: tokio::sync::Mutex<()>,
    webcam_lock: tokio::sync::Mutex<()>,
    mic: Mutex<Option<ActiveProducer>>,
    webcam: Mutex<Option<ActiveProducer>>,
    webcams: Mutex<WebcamInventory>,
    consumers: Mutex<ConsumerSet>,
    peers: Mutex<Vec<PeerInfo>>,
}

impl Room {
    /// Build a room around an already opened signaling channel
    pub fn new(
        options: RoomOptions,
        media: MediaConfig,
        signaling: Arc<dyn SignalingChannel>,
        engine: MediaEngine,
    ) -> Result<Arc<Self>, RoomError> {
        options.validate()?;

        let display_name = options
            .display_name
            .unwrap_or_else(|| media.display_name.clone());
        let (state, _) = watch::channel(RoomState::Connecting);

        Ok(Arc::new(Self {
            room_id: options.room_id,
            peer_id: options.peer_id,
            display_name,
            webcams: Mutex::new(WebcamInventory::new(media.webcam_resolution)),
            media,
            signaling,
            device: engine.device,
            capture: engine.capture,
            closed: AtomicBool::new(false),
            state,
            device_lock: tokio::sync::Mutex::new(()),
            send_lock: tokio::sync::Mutex::new(()),
            recv_lock: tokio::sync::Mutex::new(()),
            send_transport: Mutex::new(None),
            recv_transport: Mutex::new(None),
            mic_lock: tokio::sync::Mutex::new(()),
            webcam_lock: tokio::sync::Mutex::new(()),
            mic: Mutex::new(None),
            webcam: Mutex::new(None),
            consumers: Mutex::new(ConsumerSet::default()),
            peers: Mutex::new(Vec::new()),
        }))
    }

    /// Open the signaling channel for `options` and start the session.
    ///
    /// The join sequence starts once the channel reports open; use
    /// [`Room::wait_joined`] to observe its outcome.
    pub async fn connect(
        options: RoomOptions,
        config: &Config,
        connector: &dyn SignalingConnector,
        engine: MediaEngine,
    ) -> Result<Arc<Self>, RoomError> {
        options.validate()?;

        let url = signaling_url(&config.signaling.url, &options.room_id, &options.peer_id)
            .map_err(|e| RoomError::Configuration(e.to_string()))?;
        info!("Connecting room {} as peer {}", options.room_id, options.peer_id);

        let session = connector.connect(&url).await?;
        let room = Room::new(options, config.media.clone(), session.channel, engine)?;

        let event_room = room.clone();
        tokio::spawn(async move {
            event_room.run_event_loop(session.events).await;
        });

        Ok(room)
    }

    async fn run_event_loop(self: Arc<Self>, mut events: mpsc::UnboundedReceiver<SignalingEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                SignalingEvent::Open => {
                    info!("Room {} signaling open", self.room_id);
                    let room = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = room.join().await {
                            error!("Room {} failed to join: {}", room.room_id, e);
                        }
                    });
                }
                SignalingEvent::Disconnected => {
                    warn!("Room {} signaling disconnected", self.room_id);
                }
                SignalingEvent::Failed => {
                    warn!("Room {} signaling failed", self.room_id);
                }
                SignalingEvent::Closed => {
                    info!("Room {} signaling closed", self.room_id);
                    self.close();
                    break;
                }
                SignalingEvent::Request(request) => self.handle_request(request).await,
                SignalingEvent::Notification(notification) => {
                    self.handle_notification(notification)
                }
            }
        }
        debug!("Room {} event loop finished", self.room_id);
    }

    /// Run the join sequence.
    ///
    /// Steps 1-4 (device, send transport, receive transport, join request)
    /// abort on the first failure. Microphone and webcam are then enabled
    /// independently; their failures are reported, not propagated.
    pub async fn join(self: &Arc<Self>) -> Result<JoinReport, RoomError> {
        let started = self.state.send_if_modified(|state| {
            if *state == RoomState::Connecting {
                *state = RoomState::Joining;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(RoomError::InvalidState(format!(
                "cannot join from state {}",
                self.state().as_str()
            )));
        }
        info!("Room {} joining as {}", self.room_id, self.peer_id);

        let peers = match self.negotiate().await {
            Ok(peers) => peers,
            Err(e) => {
                self.set_state(RoomState::Failed(e.clone()));
                return Err(e);
            }
        };

        let mic = if self.media.produce_audio {
            self.enable_mic().await
        } else {
            debug!("Room {} skipping microphone", self.room_id);
            Ok(())
        };
        if let Err(ref e) = mic {
            warn!("Room {} could not enable microphone: {}", self.room_id, e);
        }

        let webcam = if self.media.produce_video {
            self.enable_webcam().await
        } else {
            debug!("Room {} skipping webcam", self.room_id);
            Ok(())
        };
        if let Err(ref e) = webcam {
            warn!("Room {} could not enable webcam: {}", self.room_id, e);
        }

        self.ensure_open()?;
        self.set_state(RoomState::Joined);
        info!(
            "Room {} joined ({} peers, mic: {}, webcam: {})",
            self.room_id,
            peers.len(),
            self.mic.lock().is_some(),
            self.webcam.lock().is_some()
        );

        Ok(JoinReport { peers, mic, webcam })
    }

    async fn negotiate(self: &Arc<Self>) -> Result<Vec<PeerInfo>, RoomError> {
        self.load_device().await?;
        self.create_send_transport().await?;
        self.create_recv_transport().await?;
        self.request_join().await
    }

    async fn request_join(&self) -> Result<Vec<PeerInfo>, RoomError> {
        self.ensure_open()?;
        debug!("Room {} sending join request", self.room_id);
        let response = self
            .signaling
            .request(
                RequestMethod::Join.as_str(),
                json!({
                    "displayName": self.display_name,
                    "device": {
                        "flag": "rust",
                        "name": self.media.device_name,
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "rtpCapabilities": self.device.rtp_capabilities(),
                }),
            )
            .await?;
        self.ensure_open()?;

        let peers: Vec<PeerInfo> = match response.get("peers") {
            Some(peers) => serde_json::from_value(peers.clone()).map_err(|e| {
                SignalingError::Protocol(format!("Invalid peer list: {}", e))
            })?,
            None => Vec::new(),
        };
        *self.peers.lock() = peers.clone();
        Ok(peers)
    }

    /// Wait until the join sequence settles
    pub async fn wait_joined(&self) -> Result<(), RoomError> {
        let mut rx = self.state.subscribe();
        let settled = rx
            .wait_for(|state| !matches!(state, RoomState::Connecting | RoomState::Joining))
            .await
            .map_err(|_| RoomError::Closed)?
            .clone();
        match settled {
            RoomState::Joined => Ok(()),
            RoomState::Failed(e) => Err(e),
            _ => Err(RoomError::Closed),
        }
    }

    /// Close the room and release everything it owns. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.send_replace(RoomState::Closed);
        info!("Closing room {} (peer {})", self.room_id, self.peer_id);

        for slot in [&self.mic, &self.webcam] {
            if let Some(active) = slot.lock().take() {
                active.release();
            }
        }
        for consumer in self.consumers.lock().drain() {
            consumer.close();
        }
        for slot in [&self.send_transport, &self.recv_transport] {
            if let Some(entry) = slot.lock().take() {
                entry.transport.close();
            }
        }
        self.signaling.close();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> RoomState {
        self.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RoomState> {
        self.state.subscribe()
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        self.peers.lock().clone()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            peer_id: self.peer_id.clone(),
            state: self.state().as_str(),
            closed: self.is_closed(),
            send_transport: self.send_transport.lock().as_ref().map(TransportEntry::info),
            recv_transport: self.recv_transport.lock().as_ref().map(TransportEntry::info),
            mic: self.mic.lock().as_ref().map(ActiveProducer::info),
            webcam: self.webcam.lock().as_ref().map(ActiveProducer::info),
            consumers: self.consumers.lock().infos(),
            webcams: self.webcams.lock().clone(),
            peers: self.peers(),
        }
    }

    fn set_state(&self, next: RoomState) {
        let room_id = &self.room_id;
        self.state.send_if_modified(|state| {
            if *state == RoomState::Closed || *state == next {
                return false;
            }
            debug!("Room {} state change: {:?} -> {:?}", room_id, state, next);
            *state = next;
            true
        });
    }

    fn ensure_open(&self) -> Result<(), RoomError> {
        if self.is_closed() {
            Err(RoomError::Closed)
        } else {
            Ok(())
        }
    }
}
