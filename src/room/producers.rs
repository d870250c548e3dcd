//! Microphone and webcam producers

use super::{Room, RoomError};
use crate::media::{
    audio_codec_options, video_codec_options, Encoding, LocalTrack, MediaKind, MediaProducer,
    ProduceOptions, ProducerEvent, Resolution, TransportDirection, VideoInputDevice,
    WEBCAM_SIMULCAST_ENCODINGS,
};
use crate::signaling::RequestMethod;
use log::{debug, info};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Producer bookkeeping shown in snapshots
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProducerInfo {
    pub id: String,
    pub kind: MediaKind,
    pub track_id: String,
}

/// A producer together with the capture track it owns
pub(super) struct ActiveProducer {
    producer: Arc<dyn MediaProducer>,
    track: Arc<dyn LocalTrack>,
}

impl ActiveProducer {
    pub(super) fn release(&self) {
        self.producer.close();
        self.track.stop();
    }

    pub(super) fn info(&self) -> ProducerInfo {
        ProducerInfo {
            id: self.producer.id().to_string(),
            kind: self.producer.kind(),
            track_id: self.track.id().to_string(),
        }
    }
}

impl Room {
    /// Start sending the microphone. No-op if already enabled or audio
    /// cannot be produced.
    pub async fn enable_mic(self: &Arc<Self>) -> Result<(), RoomError> {
        let _guard = self.mic_lock.lock().await;
        if !self.ready_to_produce(MediaKind::Audio)? {
            return Ok(());
        }

        debug!("Room {} enabling mic", self.room_id);
        let track = self.capture.audio_track().await?;
        self.produce(
            track,
            ProduceOptionsTemplate {
                encodings: Vec::new(),
                codec_options: audio_codec_options(),
                source: "mic",
            },
        )
        .await
    }

    /// Start sending the selected webcam with the simulcast ladder.
    ///
    /// Fails with `NoWebcam` when no video input is present.
    pub async fn enable_webcam(self: &Arc<Self>) -> Result<(), RoomError> {
        let _guard = self.webcam_lock.lock().await;
        if !self.ready_to_produce(MediaKind::Video)? {
            return Ok(());
        }

        debug!("Room {} enabling webcam", self.room_id);
        let device = self.refresh_webcams().await?.ok_or(RoomError::NoWebcam)?;
        let resolution = self.webcams.lock().resolution();
        let (width, height) = resolution.dimensions();
        debug!(
            "Room {} opening webcam {} at {}x{}",
            self.room_id, device.device_id, width, height
        );

        let track = self.capture.video_track(&device.device_id, resolution).await?;
        self.produce(
            track,
            ProduceOptionsTemplate {
                encodings: WEBCAM_SIMULCAST_ENCODINGS.to_vec(),
                codec_options: video_codec_options(),
                source: "webcam",
            },
        )
        .await
    }

    /// Stop the microphone producer. No-op when none exists.
    pub async fn disable_mic(&self) -> Result<(), RoomError> {
        let _guard = self.mic_lock.lock().await;
        self.disable_producer(MediaKind::Audio, None).await
    }

    /// Stop the webcam producer. No-op when none exists.
    pub async fn disable_webcam(&self) -> Result<(), RoomError> {
        let _guard = self.webcam_lock.lock().await;
        self.disable_producer(MediaKind::Video, None).await
    }

    /// Re-enumerate video inputs and apply the selection rule
    pub async fn refresh_webcams(&self) -> Result<Option<VideoInputDevice>, RoomError> {
        let devices = self.capture.enumerate_video_input_devices().await?;
        let mut inventory = self.webcams.lock();
        Ok(inventory.refresh(devices).cloned())
    }

    /// Resolution used the next time the webcam is enabled
    pub fn set_webcam_resolution(&self, resolution: Resolution) {
        self.webcams.lock().set_resolution(resolution);
    }

    /// Guard shared by both enable paths. Ok(false) means "nothing to do".
    fn ready_to_produce(&self, kind: MediaKind) -> Result<bool, RoomError> {
        self.ensure_open()?;
        if self.producer_slot(kind).lock().is_some() {
            debug!("Room {} {} producer already enabled", self.room_id, kind);
            return Ok(false);
        }
        if !self.device.loaded() {
            return Err(RoomError::InvalidState(
                "capability device not loaded".to_string(),
            ));
        }
        if !self.device.can_produce(kind) {
            info!("Room {} cannot produce {}", self.room_id, kind);
            return Ok(false);
        }
        if self.transport(TransportDirection::Send).is_none() {
            return Err(RoomError::InvalidState("send transport not ready".to_string()));
        }
        Ok(true)
    }

    async fn produce(
        self: &Arc<Self>,
        track: Arc<dyn LocalTrack>,
        template: ProduceOptionsTemplate,
    ) -> Result<(), RoomError> {
        let kind = track.kind();
        if self.is_closed() {
            track.stop();
            return Err(RoomError::Closed);
        }
        let Some(transport) = self.transport(TransportDirection::Send) else {
            track.stop();
            return Err(RoomError::InvalidState("send transport not ready".to_string()));
        };

        let options = ProduceOptions {
            track: track.clone(),
            encodings: template.encodings,
            codec_options: template.codec_options,
            app_data: json!({ "source": template.source }),
        };
        let handle = match transport.produce(options).await {
            Ok(handle) => handle,
            Err(e) => {
                track.stop();
                return Err(e.into());
            }
        };

        let producer_id = handle.producer.id().to_string();
        *self.producer_slot(kind).lock() = Some(ActiveProducer {
            producer: handle.producer,
            track,
        });
        // Re-check after storing; close() may have drained the slot before we filled it.
        if self.is_closed() {
            if let Some(active) = self.producer_slot(kind).lock().take() {
                active.release();
            }
            return Err(RoomError::Closed);
        }
        info!("Room {} producing {} ({})", self.room_id, kind, producer_id);
        self.watch_producer(kind, producer_id, handle.events);
        Ok(())
    }

    /// Track-ended disables the producer; transport-close is only logged.
    fn watch_producer(
        self: &Arc<Self>,
        kind: MediaKind,
        producer_id: String,
        mut events: mpsc::UnboundedReceiver<ProducerEvent>,
    ) {
        let room = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ProducerEvent::TransportClosed => {
                        info!("{} producer {} transport closed", kind, producer_id);
                    }
                    ProducerEvent::TrackEnded => {
                        info!("{} track ended, disabling producer {}", kind, producer_id);
                        let Some(room) = room.upgrade() else { break };
                        // Attempt the disable and discard its error.
                        if let Err(e) = room.disable_after_track_end(kind, &producer_id).await {
                            debug!("Ignoring disable failure for {}: {}", producer_id, e);
                        }
                        break;
                    }
                }
            }
        });
    }

    async fn disable_after_track_end(&self, kind: MediaKind, producer_id: &str) -> Result<(), RoomError> {
        let _guard = self.producer_lock(kind).lock().await;
        self.disable_producer(kind, Some(producer_id)).await
    }

    /// Release the producer of `kind`, optionally only if it is `only_id`.
    /// The caller holds the kind's producer lock.
    async fn disable_producer(&self, kind: MediaKind, only_id: Option<&str>) -> Result<(), RoomError> {
        let taken = {
            let mut slot = self.producer_slot(kind).lock();
            match (slot.as_ref(), only_id) {
                (Some(active), Some(id)) if active.producer.id() != id => None,
                _ => slot.take(),
            }
        };
        let Some(active) = taken else {
            return Ok(());
        };

        let producer_id = active.producer.id().to_string();
        info!("Room {} disabling {} producer {}", self.room_id, kind, producer_id);
        active.release();

        if self.is_closed() {
            return Ok(());
        }
        self.signaling
            .request(
                RequestMethod::CloseProducer.as_str(),
                json!({ "producerId": producer_id }),
            )
            .await?;
        Ok(())
    }

    fn producer_slot(&self, kind: MediaKind) -> &Mutex<Option<ActiveProducer>> {
        match kind {
            MediaKind::Audio => &self.mic,
            MediaKind::Video => &self.webcam,
        }
    }

    fn producer_lock(&self, kind: MediaKind) -> &tokio::sync::Mutex<()> {
        match kind {
            MediaKind::Audio => &self.mic_lock,
            MediaKind::Video => &self.webcam_lock,
        }
    }
}

struct ProduceOptionsTemplate {
    encodings: Vec<Encoding>,
    codec_options: Value,
    source: &'static str,
}
