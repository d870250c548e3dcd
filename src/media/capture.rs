//! Hardware capture seam

use super::{MediaError, MediaKind, Resolution};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A live capture track (microphone or camera)
pub trait LocalTrack: Send + Sync {
    fn id(&self) -> &str;
    fn kind(&self) -> MediaKind;
    /// Release the hardware. Idempotent.
    fn stop(&self);
}

/// A video input device as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoInputDevice {
    pub device_id: String,
    pub label: String,
}

impl VideoInputDevice {
    pub fn new(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
        }
    }
}

/// Access to local microphones and cameras
#[async_trait]
pub trait CaptureFacility: Send + Sync {
    async fn audio_track(&self) -> Result<Arc<dyn LocalTrack>, MediaError>;

    /// Open `device_id` asking for `resolution.dimensions()` as the ideal size
    async fn video_track(
        &self,
        device_id: &str,
        resolution: Resolution,
    ) -> Result<Arc<dyn LocalTrack>, MediaError>;

    /// Video inputs in host enumeration order
    async fn enumerate_video_input_devices(&self) -> Result<Vec<VideoInputDevice>, MediaError>;
}
