//! Configuration for the bridge daemon
//!
//! Loads configuration from a TOML file; every section has working
//! defaults so the daemon can also run without a file. The geofence
//! radius can additionally be overridden through the
//! `VIMANA_MAX_DISTANCE_CM` environment variable.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub drone: DroneConfig,
    pub geofence: GeofenceConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

/// Command link configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DroneConfig {
    /// Vehicle command endpoint (UDP)
    pub address: String,

    /// Local UDP port the command socket binds; the vehicle replies to the
    /// source port, and the stock firmware expects 8889
    pub local_port: u16,

    /// Per-command response timeout (seconds)
    pub command_timeout_secs: u64,
}

impl Default for DroneConfig {
    fn default() -> Self {
        Self {
            address: "192.168.10.1:8889".to_string(),
            local_port: 8889,
            command_timeout_secs: 10,
        }
    }
}

/// Geofence configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GeofenceConfig {
    /// Maximum allowed distance from the takeoff point (cm) before the
    /// return-home plan is triggered
    pub max_distance_cm: f64,
}

impl Default for GeofenceConfig {
    fn default() -> Self {
        Self {
            max_distance_cm: 300.0,
        }
    }
}

/// Frame reconstruction strategy for the raw video stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramingMode {
    /// A datagram shorter than the fixed packet size ends a frame
    ShortPacket,
    /// Frames are delimited by NAL start codes, grouped N units at a time
    StartCode,
}

/// Decode backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderMode {
    /// Prefer the in-process backend when built in, else the relay bridge
    Auto,
    /// In-process openh264 decode (requires the `native-decode` feature)
    Native,
    /// Loopback TCP relay into an external ffmpeg consumer
    Relay,
}

/// Video ingestion configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoConfig {
    /// UDP port the raw video stream arrives on
    pub bind_port: u16,

    /// Frame boundary heuristic
    pub framing: FramingMode,

    /// NAL units grouped per candidate chunk (start-code framing only)
    pub nals_per_chunk: usize,

    /// Decode backend
    pub decoder: DecoderMode,

    /// Loopback TCP port for the relay bridge (0 = ephemeral)
    pub relay_port: u16,

    /// ffmpeg executable used by the relay bridge
    pub ffmpeg_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            bind_port: 11111,
            framing: FramingMode::ShortPacket,
            nals_per_chunk: 4,
            decoder: DecoderMode::Auto,
            relay_port: 12345,
            ffmpeg_path: "ffmpeg".to_string(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())?;
        let mut config: AppConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from `path`, falling back to defaults if the file is missing
    /// or malformed (logged at warn)
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                log::warn!(
                    "could not load config from {}: {} (using defaults)",
                    path.as_ref().display(),
                    e
                );
                let mut config = Self::default();
                config.apply_env_overrides();
                config
            }
        }
    }

    /// Apply environment-variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("VIMANA_MAX_DISTANCE_CM") {
            match raw.parse::<f64>() {
                Ok(cm) if cm > 0.0 => self.geofence.max_distance_cm = cm,
                _ => log::warn!("ignoring invalid VIMANA_MAX_DISTANCE_CM={:?}", raw),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = AppConfig::default();
        assert_eq!(config.drone.address, "192.168.10.1:8889");
        assert_eq!(config.drone.local_port, 8889);
        assert_eq!(config.geofence.max_distance_cm, 300.0);
        assert_eq!(config.video.bind_port, 11111);
        assert_eq!(config.video.framing, FramingMode::ShortPacket);
        assert_eq!(config.video.nals_per_chunk, 4);
    }

    #[test]
    fn parses_partial_toml() {
        let config: AppConfig = toml::from_str(
            r#"
            [geofence]
            max_distance_cm = 150.0

            [video]
            framing = "start-code"
            decoder = "relay"
            "#,
        )
        .unwrap();
        assert_eq!(config.geofence.max_distance_cm, 150.0);
        assert_eq!(config.video.framing, FramingMode::StartCode);
        assert_eq!(config.video.decoder, DecoderMode::Relay);
        // untouched sections keep their defaults
        assert_eq!(config.drone.command_timeout_secs, 10);
    }
}
