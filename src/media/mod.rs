//! Local media model
//!
//! Types shared between the room and the external media engine:
//! - Media kinds, resolution tiers and encoding presets
//! - The capability device / transport / producer / consumer seams
//! - The hardware capture seam and webcam inventory

pub mod capture;
pub mod engine;
pub mod webcam;

pub use capture::{CaptureFacility, LocalTrack, VideoInputDevice};
pub use engine::{
    CapabilityDevice, ConnectionState, ConsumeOptions, ConsumerHandle, MediaConsumer,
    MediaProducer, MediaTransport, ProduceOptions, ProducerEvent, ProducerHandle,
    TransportDirection, TransportEvent, TransportHandle, TransportOptions, TransportParameters,
};
pub use webcam::WebcamInventory;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::error::Error;
use std::fmt;

/// Media-engine and capture errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Device capabilities could not be loaded
    DeviceLoad(String),
    /// Transport creation or negotiation failed
    Transport(String),
    /// Producing a track failed
    Produce(String),
    /// Consuming a remote producer failed
    Consume(String),
    /// Hardware capture failed (no device, permission denied)
    Capture(String),
}

impl fmt::Display for MediaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaError::DeviceLoad(msg) => write!(f, "Device load failed: {}", msg),
            MediaError::Transport(msg) => write!(f, "Transport error: {}", msg),
            MediaError::Produce(msg) => write!(f, "Produce failed: {}", msg),
            MediaError::Consume(msg) => write!(f, "Consume failed: {}", msg),
            MediaError::Capture(msg) => write!(f, "Capture failed: {}", msg),
        }
    }
}

impl Error for MediaError {}

/// Kind of media a track carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Webcam capture resolution tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    #[serde(alias = "qvga")]
    Low,
    #[serde(alias = "vga")]
    Medium,
    #[default]
    #[serde(alias = "hd")]
    High,
}

impl Resolution {
    /// Ideal (width, height) requested from the capture device
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            Resolution::Low => (320, 240),
            Resolution::Medium => (640, 480),
            Resolution::High => (1280, 720),
        }
    }
}

/// One simulcast layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Encoding {
    pub scale_resolution_down_by: u32,
    pub max_bitrate: u32,
}

/// Three-layer webcam simulcast ladder, lowest layer first
pub const WEBCAM_SIMULCAST_ENCODINGS: [Encoding; 3] = [
    Encoding {
        scale_resolution_down_by: 4,
        max_bitrate: 500_000,
    },
    Encoding {
        scale_resolution_down_by: 2,
        max_bitrate: 1_000_000,
    },
    Encoding {
        scale_resolution_down_by: 1,
        max_bitrate: 5_000_000,
    },
];

/// Start bitrate hint (kbps) for webcam encoders
pub const VIDEO_START_BITRATE_KBPS: u32 = 1000;

/// Codec options for the microphone producer
pub fn audio_codec_options() -> Value {
    json!({ "opusStereo": 1, "opusDtx": 1 })
}

/// Codec options for the webcam producer
pub fn video_codec_options() -> Value {
    json!({ "videoGoogleStartBitrate": VIDEO_START_BITRATE_KBPS })
}
