//! In-memory signaling and media engine used by unit tests

use crate::config::MediaConfig;
use crate::media::{
    CapabilityDevice, CaptureFacility, ConnectionState, ConsumeOptions, ConsumerHandle, Encoding,
    LocalTrack, MediaConsumer, MediaError, MediaKind, MediaProducer, MediaTransport, ProduceOptions,
    ProducerEvent, ProducerHandle, Resolution, TransportDirection, TransportEvent, TransportHandle,
    TransportOptions, VideoInputDevice,
};
use crate::room::{MediaEngine, Room, RoomOptions};
use crate::signaling::{
    SignalingChannel, SignalingConnector, SignalingError, SignalingEvent, SignalingSession,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use url::Url;

/// Poll `condition` until it holds, panicking after about a second
pub(crate) async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

/// Fakes wired together: two cameras, both kinds producible
pub(crate) struct Harness {
    pub signaling: Arc<FakeSignaling>,
    pub device: Arc<FakeDevice>,
    pub capture: Arc<FakeCapture>,
    pub media: MediaConfig,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_media(MediaConfig::default())
    }

    pub fn with_media(media: MediaConfig) -> Self {
        let capture = Arc::new(FakeCapture::default());
        capture.set_devices(&["cam-front", "cam-back"]);
        Self {
            signaling: Arc::new(FakeSignaling::default()),
            device: Arc::new(FakeDevice::default()),
            capture,
            media,
        }
    }

    pub fn engine(&self) -> MediaEngine {
        MediaEngine {
            device: self.device.clone(),
            capture: self.capture.clone(),
        }
    }

    /// A room on the fake channel, not yet joined
    pub fn room(&self) -> Arc<Room> {
        let signaling: Arc<dyn SignalingChannel> = self.signaling.clone();
        Room::new(
            RoomOptions::new("r1", "p1"),
            self.media.clone(),
            signaling,
            self.engine(),
        )
        .expect("room")
    }

    pub fn connector(&self) -> FakeConnector {
        FakeConnector::new(self.signaling.clone())
    }
}

/// Scripted signaling server
#[derive(Default)]
pub(crate) struct FakeSignaling {
    calls: Mutex<Vec<(String, Value)>>,
    failures: Mutex<HashMap<String, SignalingError>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    produced: AtomicUsize,
    closed: AtomicBool,
}

impl FakeSignaling {
    /// Fail every request matching `label` (a method, or
    /// `createWebRtcTransport:send` / `createWebRtcTransport:recv`)
    pub fn fail(&self, label: &str, error: SignalingError) {
        self.failures.lock().insert(label.to_string(), error);
    }

    /// Hold the next request matching `label` until the gate is notified.
    /// A held request answers even if the channel closed meanwhile.
    pub fn hold(&self, label: &str) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.gates.lock().insert(label.to_string(), gate.clone());
        gate
    }

    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().clone()
    }

    pub fn methods(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(method, _)| method.clone()).collect()
    }

    fn label(method: &str, data: &Value) -> String {
        if method == "createWebRtcTransport" {
            let side = if data["producing"] == true { "send" } else { "recv" };
            format!("{}:{}", method, side)
        } else {
            method.to_string()
        }
    }

    fn respond(&self, method: &str, data: &Value) -> Value {
        match method {
            "getRouterRtpCapabilities" => json!({
                "codecs": [
                    {"kind": "audio", "mimeType": "audio/opus", "clockRate": 48000},
                    {"kind": "video", "mimeType": "video/VP8", "clockRate": 90000}
                ]
            }),
            "createWebRtcTransport" => {
                let id = if data["producing"] == true {
                    "send-transport"
                } else {
                    "recv-transport"
                };
                json!({
                    "id": id,
                    "iceParameters": {"usernameFragment": "frag", "password": "pw"},
                    "iceCandidates": [],
                    "dtlsParameters": {"role": "auto", "fingerprints": []}
                })
            }
            "produce" => {
                let n = self.produced.fetch_add(1, Ordering::SeqCst) + 1;
                json!({ "id": format!("producer-{}", n) })
            }
            "join" => json!({ "peers": [{"id": "p2", "displayName": "Bob"}] }),
            _ => json!({}),
        }
    }
}

#[async_trait]
impl SignalingChannel for FakeSignaling {
    async fn request(&self, method: &str, data: Value) -> Result<Value, SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }
        let label = Self::label(method, &data);
        self.calls.lock().push((method.to_string(), data.clone()));

        let gate = {
            let mut gates = self.gates.lock();
            gates.remove(&label).or_else(|| gates.remove(method))
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let failure = {
            let failures = self.failures.lock();
            failures.get(&label).or_else(|| failures.get(method)).cloned()
        };
        match failure {
            Some(e) => Err(e),
            None => Ok(self.respond(method, &data)),
        }
    }

    async fn notify(&self, _method: &str, _data: Value) -> Result<(), SignalingError> {
        if self.is_closed() {
            return Err(SignalingError::Closed);
        }
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Hands out one session backed by the shared fake channel
pub(crate) struct FakeConnector {
    channel: Arc<FakeSignaling>,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<SignalingEvent>>>,
    connects: AtomicUsize,
    last_url: Mutex<Option<String>>,
}

impl FakeConnector {
    fn new(channel: Arc<FakeSignaling>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            channel,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            connects: AtomicUsize::new(0),
            last_url: Mutex::new(None),
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_url(&self) -> Option<String> {
        self.last_url.lock().clone()
    }

    pub fn send(&self, event: SignalingEvent) {
        let _ = self.events_tx.send(event);
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn connect(&self, url: &Url) -> Result<SignalingSession, SignalingError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        *self.last_url.lock() = Some(url.to_string());
        let events = self
            .events_rx
            .lock()
            .take()
            .ok_or_else(|| SignalingError::Connection("already connected".to_string()))?;
        Ok(SignalingSession {
            channel: self.channel.clone(),
            events,
        })
    }
}

#[derive(Default)]
pub(crate) struct FakeDevice {
    loads: AtomicUsize,
    loaded: AtomicBool,
    cannot_produce: Mutex<Vec<MediaKind>>,
    transports: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeDevice {
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn set_can_produce(&self, kind: MediaKind, allowed: bool) {
        let mut denied = self.cannot_produce.lock();
        denied.retain(|k| *k != kind);
        if !allowed {
            denied.push(kind);
        }
    }

    pub fn transports(&self) -> Vec<Arc<FakeTransport>> {
        self.transports.lock().clone()
    }

    pub fn send_transport(&self) -> Arc<FakeTransport> {
        self.find(TransportDirection::Send)
    }

    pub fn recv_transport(&self) -> Arc<FakeTransport> {
        self.find(TransportDirection::Recv)
    }

    fn find(&self, direction: TransportDirection) -> Arc<FakeTransport> {
        self.transports
            .lock()
            .iter()
            .find(|t| t.direction == direction)
            .cloned()
            .expect("no transport in that direction")
    }

    fn build(&self, options: TransportOptions, direction: TransportDirection) -> TransportHandle {
        let (events_tx, events) = mpsc::unbounded_channel();
        let transport = Arc::new(FakeTransport {
            id: options.parameters.id,
            direction,
            events: events_tx,
            connected: tokio::sync::Mutex::new(false),
            closed: AtomicBool::new(false),
            producers: Mutex::new(Vec::new()),
            produce_calls: Mutex::new(Vec::new()),
            consumers: Mutex::new(Vec::new()),
        });
        self.transports.lock().push(transport.clone());
        TransportHandle { transport, events }
    }
}

#[async_trait]
impl CapabilityDevice for FakeDevice {
    async fn load(&self, _router_rtp_capabilities: Value) -> Result<(), MediaError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if self.loaded.swap(true, Ordering::SeqCst) {
            return Err(MediaError::DeviceLoad("already loaded".to_string()));
        }
        Ok(())
    }

    fn loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn rtp_capabilities(&self) -> Value {
        json!({
            "codecs": [{"kind": "audio", "mimeType": "audio/opus"}],
            "headerExtensions": []
        })
    }

    fn can_produce(&self, kind: MediaKind) -> bool {
        !self.cannot_produce.lock().contains(&kind)
    }

    fn create_send_transport(&self, options: TransportOptions) -> Result<TransportHandle, MediaError> {
        Ok(self.build(options, TransportDirection::Send))
    }

    fn create_recv_transport(&self, options: TransportOptions) -> Result<TransportHandle, MediaError> {
        Ok(self.build(options, TransportDirection::Recv))
    }
}

/// What the room asked a send transport to produce
#[derive(Debug, Clone)]
pub(crate) struct ProduceCall {
    pub encodings: Vec<Encoding>,
    pub codec_options: Value,
    pub app_data: Value,
}

/// Transport that raises connect/produce events like a real engine would
pub(crate) struct FakeTransport {
    id: String,
    direction: TransportDirection,
    events: mpsc::UnboundedSender<TransportEvent>,
    connected: tokio::sync::Mutex<bool>,
    closed: AtomicBool,
    producers: Mutex<Vec<Arc<FakeProducer>>>,
    produce_calls: Mutex<Vec<ProduceCall>>,
    consumers: Mutex<Vec<Arc<FakeConsumer>>>,
}

impl FakeTransport {
    /// Raise a connect event and wait for the room's answer
    pub async fn connect(&self) -> Result<(), String> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(TransportEvent::Connect {
                dtls_parameters: json!({"role": "client", "fingerprints": []}),
                reply,
            })
            .map_err(|_| "listener gone".to_string())?;
        rx.await.map_err(|_| "no answer".to_string())?
    }

    /// Raise a produce event and wait for the server-assigned id
    pub async fn request_produce(&self) -> Result<String, String> {
        self.raise_produce(MediaKind::Audio, json!({})).await
    }

    pub fn report_state(&self, state: ConnectionState) {
        let _ = self.events.send(TransportEvent::ConnectionStateChange(state));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn producers(&self) -> Vec<Arc<FakeProducer>> {
        self.producers.lock().clone()
    }

    pub fn produce_calls(&self) -> Vec<ProduceCall> {
        self.produce_calls.lock().clone()
    }

    pub fn consumers(&self) -> Vec<Arc<FakeConsumer>> {
        self.consumers.lock().clone()
    }

    async fn raise_produce(&self, kind: MediaKind, app_data: Value) -> Result<String, String> {
        let (reply, rx) = oneshot::channel();
        self.events
            .send(TransportEvent::Produce {
                kind,
                rtp_parameters: json!({"codecs": []}),
                app_data,
                reply,
            })
            .map_err(|_| "listener gone".to_string())?;
        rx.await.map_err(|_| "no answer".to_string())?
    }

    /// First media operation on a transport connects it
    async fn ensure_connected(&self) -> Result<(), String> {
        let mut connected = self.connected.lock().await;
        if !*connected {
            self.connect().await?;
            *connected = true;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaTransport for FakeTransport {
    fn id(&self) -> &str {
        &self.id
    }

    fn direction(&self) -> TransportDirection {
        self.direction
    }

    async fn produce(&self, options: ProduceOptions) -> Result<ProducerHandle, MediaError> {
        self.produce_calls.lock().push(ProduceCall {
            encodings: options.encodings.clone(),
            codec_options: options.codec_options.clone(),
            app_data: options.app_data.clone(),
        });
        self.ensure_connected().await.map_err(MediaError::Transport)?;

        let kind = options.track.kind();
        let id = self
            .raise_produce(kind, options.app_data)
            .await
            .map_err(MediaError::Produce)?;

        let (events_tx, events) = mpsc::unbounded_channel();
        let producer = Arc::new(FakeProducer {
            id,
            kind,
            events: events_tx,
            closed: AtomicBool::new(false),
        });
        self.producers.lock().push(producer.clone());
        Ok(ProducerHandle { producer, events })
    }

    async fn consume(&self, options: ConsumeOptions) -> Result<ConsumerHandle, MediaError> {
        self.ensure_connected().await.map_err(MediaError::Consume)?;
        let consumer = Arc::new(FakeConsumer {
            id: options.id,
            producer_id: options.producer_id,
            kind: options.kind,
            closed: AtomicBool::new(false),
        });
        self.consumers.lock().push(consumer.clone());
        Ok(consumer)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct FakeProducer {
    id: String,
    kind: MediaKind,
    events: mpsc::UnboundedSender<ProducerEvent>,
    closed: AtomicBool,
}

impl FakeProducer {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn end_track(&self) {
        let _ = self.events.send(ProducerEvent::TrackEnded);
    }

    pub fn close_transport(&self) {
        let _ = self.events.send(ProducerEvent::TransportClosed);
    }
}

impl MediaProducer for FakeProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct FakeConsumer {
    id: String,
    producer_id: String,
    kind: MediaKind,
    closed: AtomicBool,
}

impl FakeConsumer {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl MediaConsumer for FakeConsumer {
    fn id(&self) -> &str {
        &self.id
    }

    fn producer_id(&self) -> &str {
        &self.producer_id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub(crate) struct FakeCapture {
    devices: Mutex<Vec<VideoInputDevice>>,
    audio_fails: AtomicBool,
    audio_requests: AtomicUsize,
    enumerations: AtomicUsize,
    video_requests: Mutex<Vec<(String, Resolution)>>,
    tracks: Mutex<Vec<Arc<FakeTrack>>>,
}

impl FakeCapture {
    pub fn set_devices(&self, ids: &[&str]) {
        *self.devices.lock() = ids
            .iter()
            .map(|id| VideoInputDevice::new(*id, format!("Camera {}", id)))
            .collect();
    }

    pub fn fail_audio(&self) {
        self.audio_fails.store(true, Ordering::SeqCst);
    }

    pub fn audio_requests(&self) -> usize {
        self.audio_requests.load(Ordering::SeqCst)
    }

    pub fn enumerations(&self) -> usize {
        self.enumerations.load(Ordering::SeqCst)
    }

    pub fn video_requests(&self) -> Vec<(String, Resolution)> {
        self.video_requests.lock().clone()
    }

    /// Every track handed out, in order
    pub fn tracks(&self) -> Vec<Arc<FakeTrack>> {
        self.tracks.lock().clone()
    }

    fn new_track(&self, kind: MediaKind) -> Arc<FakeTrack> {
        let mut tracks = self.tracks.lock();
        let track = Arc::new(FakeTrack {
            id: format!("{}-track-{}", kind, tracks.len() + 1),
            kind,
            stopped: AtomicBool::new(false),
        });
        tracks.push(track.clone());
        track
    }
}

#[async_trait]
impl CaptureFacility for FakeCapture {
    async fn audio_track(&self) -> Result<Arc<dyn LocalTrack>, MediaError> {
        self.audio_requests.fetch_add(1, Ordering::SeqCst);
        if self.audio_fails.load(Ordering::SeqCst) {
            return Err(MediaError::Capture("microphone permission denied".to_string()));
        }
        Ok(self.new_track(MediaKind::Audio))
    }

    async fn video_track(
        &self,
        device_id: &str,
        resolution: Resolution,
    ) -> Result<Arc<dyn LocalTrack>, MediaError> {
        self.video_requests
            .lock()
            .push((device_id.to_string(), resolution));
        Ok(self.new_track(MediaKind::Video))
    }

    async fn enumerate_video_input_devices(&self) -> Result<Vec<VideoInputDevice>, MediaError> {
        self.enumerations.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().clone())
    }
}

pub(crate) struct FakeTrack {
    id: String,
    kind: MediaKind,
    stopped: AtomicBool,
}

impl FakeTrack {
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

impl LocalTrack for FakeTrack {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}
