//! Camera bridge client
//!
//! The bridge turns a camera name into everything needed to start a live
//! session: the signaling relay URL, the peer's client identifier and the
//! relay (STUN/TURN) servers. One request per connection attempt, no retries.

mod client;
mod normalize;

pub use client::BridgeClient;
pub use normalize::{decode_relay_url, normalize_endpoint};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Success sentinel in the bridge's `result` field
pub const BOOTSTRAP_OK: &str = "ok";

/// Bootstrap data for one connection attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionBootstrap {
    /// Bridge result, always [`BOOTSTRAP_OK`] once handed to the negotiator
    pub status: String,
    /// Camera name the bridge resolved
    pub camera_id: String,
    /// Client identifier of the remote peer, used as `recipientClientId`
    pub peer_client_id: String,
    /// Signaling relay WebSocket URL
    pub relay_url: String,
    /// STUN/TURN servers for the media session
    pub relay_servers: Vec<RelayServer>,
}

/// A STUN or TURN server entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayServer {
    pub endpoints: Vec<String>,
    pub username: Option<String>,
    pub credential: Option<String>,
}

impl RelayServer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoints: vec![endpoint.into()],
            username: None,
            credential: None,
        }
    }

    /// Whether any endpoint is a TURN URL (those need credentials)
    pub fn is_turn(&self) -> bool {
        self.endpoints
            .iter()
            .any(|url| url.starts_with("turn:") || url.starts_with("turns:"))
    }
}

/// Source of session bootstrap data
#[async_trait]
pub trait BootstrapSource: Send + Sync {
    /// Fetch bootstrap data for `camera_id`
    ///
    /// A non-"ok" bridge result surfaces as
    /// [`AppError::SignalingRejected`](crate::error::AppError::SignalingRejected),
    /// transport problems as
    /// [`AppError::SignalingRequest`](crate::error::AppError::SignalingRequest).
    async fn fetch_bootstrap(&self, camera_id: &str) -> Result<SessionBootstrap>;
}
