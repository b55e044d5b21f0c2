//! Local media session
//!
//! The negotiator talks to the peer connection through [`MediaSession`], so
//! the same negotiation code drives webrtc-rs in production and in-process
//! fakes in tests. Everything the peer connection reports comes back as a
//! [`MediaEvent`] on the channel handed to [`MediaFactory::create`].

pub mod peer;
pub mod sink;

pub use peer::PeerFactory;
pub use sink::RtpStatsSink;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::bridge::RelayServer;
use crate::error::Result;
use crate::signaling::{IceCandidate, SessionDescription};

/// ICE connection state reported by the media transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    New,
    Checking,
    Connected,
    Completed,
    Disconnected,
    Failed,
    Closed,
}

impl std::fmt::Display for TransportState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportState::New => write!(f, "new"),
            TransportState::Checking => write!(f, "checking"),
            TransportState::Connected => write!(f, "connected"),
            TransportState::Completed => write!(f, "completed"),
            TransportState::Disconnected => write!(f, "disconnected"),
            TransportState::Failed => write!(f, "failed"),
            TransportState::Closed => write!(f, "closed"),
        }
    }
}

/// Media kind of an inbound track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

/// Inbound media track
#[async_trait]
pub trait RemoteTrack: Send + Sync {
    fn kind(&self) -> MediaKind;
    fn id(&self) -> String;
    fn stream_id(&self) -> String;
    /// Next RTP packet; `None` once the track has ended
    async fn read_packet(&self) -> Option<rtp::packet::Packet>;
}

/// Rendering surface for inbound media
///
/// Provided by the UI surface; the session manager never renders.
pub trait VideoSink: Send + Sync {
    /// Bind an inbound track to the sink
    ///
    /// Called as soon as a track arrives and possibly more than once for the
    /// same track, so implementations must be idempotent.
    fn bind(&self, track: Arc<dyn RemoteTrack>);
}

/// Event reported by a media session
#[derive(Clone)]
pub enum MediaEvent {
    /// Locally gathered ICE candidate, to be sent to the peer
    LocalCandidate(IceCandidate),
    /// ICE connection state change
    Transport(TransportState),
    /// Remote track arrived
    Track(Arc<dyn RemoteTrack>),
}

impl std::fmt::Debug for MediaEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaEvent::LocalCandidate(c) => f.debug_tuple("LocalCandidate").field(c).finish(),
            MediaEvent::Transport(s) => f.debug_tuple("Transport").field(s).finish(),
            MediaEvent::Track(t) => f.debug_tuple("Track").field(&t.id()).finish(),
        }
    }
}

/// Local peer connection used for one attempt
#[async_trait]
pub trait MediaSession: Send + Sync {
    /// Create the local offer, apply it locally and return its SDP
    async fn create_offer(&self) -> Result<String>;

    /// Apply the peer's offer or answer as the remote description
    async fn apply_remote(&self, description: &SessionDescription) -> Result<()>;

    /// Apply a remote ICE candidate
    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    /// Close the peer connection
    async fn close(&self) -> Result<()>;
}

/// Creates media sessions
#[async_trait]
pub trait MediaFactory: Send + Sync {
    /// Create a session using `relay_servers`, reporting through `events`
    async fn create(
        &self,
        session_id: &str,
        relay_servers: &[RelayServer],
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Arc<dyn MediaSession>>;
}
