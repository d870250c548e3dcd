//! Configuration management for room-signal

use crate::media::Resolution;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Signaling configuration
    #[serde(default)]
    pub signaling: SignalingConfig,

    /// Local media configuration
    #[serde(default)]
    pub media: MediaConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalingConfig {
    /// Base URL of the signaling server (`roomId`/`peerId` are appended)
    #[serde(default = "default_signaling_url")]
    pub url: String,

    /// How long a request may wait for its response
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// WebSocket subprotocol announced on connect
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

impl Default for SignalingConfig {
    fn default() -> Self {
        Self {
            url: default_signaling_url(),
            request_timeout_ms: default_request_timeout_ms(),
            protocol: default_protocol(),
        }
    }
}

/// ICE server handed to the media engine when transports are built
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    pub urls: Vec<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub credential: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Name shown to the other peers
    #[serde(default = "default_display_name")]
    pub display_name: String,

    /// Device name reported in the join request
    #[serde(default = "default_device_name")]
    pub device_name: String,

    /// Capture resolution tier for the webcam
    #[serde(default)]
    pub webcam_resolution: Resolution,

    /// Enable the microphone as part of joining
    #[serde(default = "default_true")]
    pub produce_audio: bool,

    /// Enable the webcam as part of joining
    #[serde(default = "default_true")]
    pub produce_video: bool,

    /// Ask the server for TCP-only transports
    #[serde(default)]
    pub force_tcp: bool,

    /// ICE servers for the media transports
    #[serde(default)]
    pub ice_servers: Vec<IceServer>,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            device_name: default_device_name(),
            webcam_resolution: Resolution::default(),
            produce_audio: true,
            produce_video: true,
            force_tcp: false,
            ice_servers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or env_logger filter string
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from TOML file
    pub fn load(path: &PathBuf) -> Result<Self, Box<dyn std::error::Error>> {
        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        let url = url::Url::parse(&self.signaling.url)?;
        if url.scheme() != "ws" && url.scheme() != "wss" {
            return Err("Signaling url must use ws:// or wss://".into());
        }

        if self.signaling.request_timeout_ms == 0 {
            return Err("Signaling request timeout must be non-zero".into());
        }

        if self.signaling.protocol.trim().is_empty() {
            return Err("Signaling protocol must not be empty".into());
        }

        for server in &self.media.ice_servers {
            if server.urls.is_empty() {
                return Err("ICE server entries need at least one url".into());
            }
        }

        Ok(())
    }
}


fn default_signaling_url() -> String {
    "wss://localhost:4443".to_string()
}

fn default_request_timeout_ms() -> u64 {
    22_500
}

fn default_protocol() -> String {
    "protoo".to_string()
}

fn default_display_name() -> String {
    "Guest".to_string()
}

fn default_device_name() -> String {
    "room-signal".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}
