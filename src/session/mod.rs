//! Live-view sessions
//!
//! [`SessionManager::connect`] starts one connection attempt for a camera and
//! returns a [`SessionHandle`]. The attempt runs on its own task (see
//! [`negotiator`]) and reports progress through the handle as a
//! [`SessionStatus`] stream. There is no automatic reconnect: a failed
//! attempt stays failed until torn down and a new one is started.

mod candidates;
mod handle;
mod negotiator;
pub mod state;

pub use candidates::CandidateBuffer;
pub use handle::{teardown, SessionHandle};
pub use state::{ConnectionState, SessionEvent, SessionStatus, StateMachine};

use std::sync::Arc;

use tracing::info;

use crate::bridge::{BootstrapSource, BridgeClient};
use crate::config::{AppConfig, SessionConfig};
use crate::error::Result;
use crate::media::{MediaFactory, PeerFactory, VideoSink};
use crate::signaling::{SignalingConnector, WsConnector};
use handle::SessionShared;
use negotiator::Negotiator;

/// Starts live-view sessions
pub struct SessionManager {
    bootstrap: Arc<dyn BootstrapSource>,
    connector: Arc<dyn SignalingConnector>,
    media: Arc<dyn MediaFactory>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        bootstrap: Arc<dyn BootstrapSource>,
        connector: Arc<dyn SignalingConnector>,
        media: Arc<dyn MediaFactory>,
        config: SessionConfig,
    ) -> Self {
        Self {
            bootstrap,
            connector,
            media,
            config,
        }
    }

    /// Manager backed by the HTTP bridge, WebSocket relay and webrtc-rs
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let bridge = BridgeClient::new(&config.bridge)?;
        Ok(Self::new(
            Arc::new(bridge),
            Arc::new(WsConnector::new()),
            Arc::new(PeerFactory::new()),
            config.session.clone(),
        ))
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Start a connection attempt for `camera_id`
    ///
    /// Inbound tracks are bound to `sink` as they arrive. Must be called from
    /// within a Tokio runtime.
    pub fn connect(&self, camera_id: &str, sink: Arc<dyn VideoSink>) -> SessionHandle {
        let session_id = uuid::Uuid::new_v4().to_string();
        info!("Starting session {} for camera {}", session_id, camera_id);

        let shared = Arc::new(SessionShared::new(session_id));
        let handle = SessionHandle::new(shared.clone(), camera_id.to_string());

        let negotiator = Negotiator::new(
            shared,
            camera_id.to_string(),
            self.bootstrap.clone(),
            self.connector.clone(),
            self.media.clone(),
            sink,
            &self.config,
        );
        tokio::spawn(negotiator.run());

        handle
    }
}
