//! Configuration for tello-io
//!
//! Loaded from a TOML file. Every field has a default matching the Tello's
//! factory network layout, so a partial (or missing) file is fine:
//!
//! ```toml
//! [control]
//! local_port = 9000
//! vehicle_address = "192.168.10.1:8889"
//! quit_command = "q"
//!
//! [video]
//! bind_host = "0.0.0.0"
//! port = 11111
//! backend = "ffmpeg"   # "synthetic" without the ffmpeg feature
//!
//! [logging]
//! level = "info"
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub control: ControlConfig,
    pub video: VideoConfig,
    pub logging: LoggingConfig,
}

/// Command channel configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Local UDP port the command socket binds to (acks arrive here)
    pub local_port: u16,

    /// Vehicle command listener
    ///
    /// Examples:
    /// - `192.168.10.1:8889` - Tello in AP mode
    /// - `127.0.0.1:8889` - Local simulator
    pub vehicle_address: String,

    /// Operator input that ends the session instead of being sent
    pub quit_command: String,

    /// How long startup waits for the `command`/`streamon` acks before
    /// opening video anyway
    pub startup_ack_timeout_ms: u64,

    /// Extra pause after the startup acks before the video capture is opened
    pub stream_settle_ms: u64,

    /// Receive timeout used to notice a closed channel
    pub receive_poll_ms: u64,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            local_port: 9000,
            vehicle_address: "192.168.10.1:8889".to_string(),
            quit_command: "q".to_string(),
            startup_ack_timeout_ms: 3000,
            stream_settle_ms: 0,
            receive_poll_ms: 100,
        }
    }
}

impl ControlConfig {
    /// Parsed vehicle address
    pub fn vehicle_addr(&self) -> Result<SocketAddr> {
        self.vehicle_address.parse().map_err(|e| {
            Error::Config(format!(
                "invalid vehicle_address '{}': {}",
                self.vehicle_address, e
            ))
        })
    }
}

#[cfg(feature = "ffmpeg")]
const DEFAULT_BACKEND: &str = "ffmpeg";
#[cfg(not(feature = "ffmpeg"))]
const DEFAULT_BACKEND: &str = "synthetic";

/// Video capture configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VideoConfig {
    /// Local interface the media stream is received on
    pub bind_host: String,
    /// Local UDP port the vehicle streams to
    pub port: u16,
    /// Decoder backend: "ffmpeg" or "synthetic". Defaults to "ffmpeg" when
    /// built with the `ffmpeg` feature, "synthetic" otherwise.
    pub backend: String,
    /// Upper bound on a single frame grab before the loop re-checks its state
    pub grab_timeout_ms: u64,
    /// How long `stop()` waits for the capture thread to exit
    pub stop_timeout_ms: u64,
    /// Settings for the synthetic test-pattern backend
    pub synthetic: SyntheticConfig,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 11111,
            backend: DEFAULT_BACKEND.to_string(),
            grab_timeout_ms: 200,
            stop_timeout_ms: 2000,
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl VideoConfig {
    /// Media URL in the `udp://@host:port` form decoders expect
    pub fn stream_url(&self) -> String {
        format!("udp://@{}:{}", self.bind_host, self.port)
    }
}

/// Synthetic frame generator settings
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Stop producing frames after this many (simulates a stream going bad)
    pub frame_limit: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 960,
            height: 720,
            fps: 30.0,
            frame_limit: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default log level (trace, debug, info, warn, error); `RUST_LOG` wins
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
    /// Load configuration from TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot
    pub fn validate(&self) -> Result<()> {
        self.control.vehicle_addr()?;

        if self.control.quit_command.trim().is_empty() {
            return Err(Error::Config("quit_command must not be empty".to_string()));
        }
        if self.control.receive_poll_ms == 0 {
            return Err(Error::Config("receive_poll_ms must be > 0".to_string()));
        }
        if self.video.port == 0 {
            return Err(Error::Config("video port must be > 0".to_string()));
        }
        if self.video.grab_timeout_ms == 0 {
            return Err(Error::Config("grab_timeout_ms must be > 0".to_string()));
        }
        let fps = self.video.synthetic.fps;
        if !(fps.is_finite() && fps > 0.0) {
            return Err(Error::Config(format!(
                "synthetic fps must be a finite number > 0, got {}",
                fps
            )));
        }
        Ok(())
    }
}
