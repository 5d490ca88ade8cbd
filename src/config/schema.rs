use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Stream server settings
    pub server: ServerConfig,
    /// Frame source settings
    pub source: SourceConfig,
    /// Viewer client settings
    pub client: ClientConfig,
}

/// Stream server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0" or "::")
    pub bind_address: String,
    /// HTTP port
    pub port: u16,
    /// How long a stream session waits for a new frame before re-checking
    /// whether the server is still running
    pub wait_timeout_ms: u64,
    /// How long a connection may take to send its request head
    pub request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
            wait_timeout_ms: 5000,
            request_timeout_ms: 5000,
        }
    }
}

impl ServerConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Which frame source feeds the server
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Synthetic moving test pattern
    #[default]
    TestPattern,
    /// Replay JPEG files from a directory
    Directory,
}

/// Frame source configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Directory of JPEG files (directory source only)
    pub directory: Option<String>,
    /// Test pattern width
    pub width: u32,
    /// Test pattern height
    pub height: u32,
    /// Frames per second
    pub fps: u32,
    /// JPEG quality (1-100, test pattern only)
    pub quality: u8,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            kind: SourceKind::TestPattern,
            directory: None,
            width: 640,
            height: 360,
            fps: 15,
            quality: 70,
        }
    }
}

impl SourceConfig {
    /// Interval between frames; fps of 0 is treated as 1
    pub fn frame_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

/// Viewer client configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Largest accepted Content-Length for a single frame
    pub max_frame_size: usize,
    /// Fixed delay between a failure and the next connection attempt
    pub reconnect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    /// A read stalled longer than this counts as a dropped connection
    pub read_timeout_ms: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_frame_size: 1024 * 1024,
            reconnect_delay_ms: 2000,
            connect_timeout_ms: 5000,
            read_timeout_ms: 10000,
        }
    }
}

impl ClientConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}
