//! room-signal - multi-party media room signaling
//!
//! Drives one peer's session in a media room: opens a protoo signaling
//! channel, negotiates the capability device and send/receive transports,
//! joins, publishes microphone and webcam, and consumes remote producers
//! as the server announces them. Media itself is handled by an external
//! engine plugged in through the traits in [`media`].

pub mod config;
pub mod logging;
pub mod media;
pub mod room;
pub mod signaling;

#[cfg(test)]
mod testing;

// Re-exports
pub use config::Config;
pub use media::{CapabilityDevice, CaptureFacility, MediaError, MediaKind, Resolution};
pub use room::{JoinReport, MediaEngine, Room, RoomError, RoomOptions, RoomSnapshot, RoomState};
pub use signaling::{SignalingChannel, SignalingConnector, SignalingError, WebSocketConnector};
