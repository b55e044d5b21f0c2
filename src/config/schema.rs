use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Bridge (bootstrap endpoint) settings
    pub bridge: BridgeConfig,
    /// Streaming session timing
    pub session: SessionConfig,
}

/// Bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the camera bridge, e.g. `http://127.0.0.1:5050`
    pub base_url: String,
    /// Timeout for the bootstrap request in seconds
    pub request_timeout_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5050".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl BridgeConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Streaming session timing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Time from offer creation until connectivity must be reached (ms)
    pub negotiation_timeout_ms: u64,
    /// How long a dropped connection may stay disconnected before failing (ms)
    pub disconnect_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            negotiation_timeout_ms: 30_000,
            disconnect_grace_ms: 5_000,
        }
    }
}

impl SessionConfig {
    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_millis(self.negotiation_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }
}
