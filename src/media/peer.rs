//! webrtc-rs media session

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::{RTCRtpTransceiver, RTCRtpTransceiverInit};
use webrtc::track::track_remote::TrackRemote;

use super::{MediaEvent, MediaFactory, MediaKind, MediaSession, RemoteTrack, TransportState};
use crate::bridge::RelayServer;
use crate::error::{AppError, Result};
use crate::signaling::{DescriptionKind, IceCandidate, SessionDescription};

/// Build ICE servers from bridge relay servers
///
/// TURN entries without credentials are skipped; webrtc-rs rejects them.
pub fn ice_servers(relay_servers: &[RelayServer]) -> Vec<RTCIceServer> {
    let mut servers = vec![];
    for server in relay_servers {
        let username = server.username.clone().unwrap_or_default();
        let credential = server.credential.clone().unwrap_or_default();
        if server.is_turn() && (username.is_empty() || credential.is_empty()) {
            warn!(
                "Skipping TURN server {:?} - credentials required but missing",
                server.endpoints
            );
            continue;
        }
        servers.push(RTCIceServer {
            urls: server.endpoints.clone(),
            username,
            credential,
            ..Default::default()
        });
    }
    servers
}

fn transport_state(state: RTCIceConnectionState) -> Option<TransportState> {
    Some(match state {
        RTCIceConnectionState::New => TransportState::New,
        RTCIceConnectionState::Checking => TransportState::Checking,
        RTCIceConnectionState::Connected => TransportState::Connected,
        RTCIceConnectionState::Completed => TransportState::Completed,
        RTCIceConnectionState::Disconnected => TransportState::Disconnected,
        RTCIceConnectionState::Failed => TransportState::Failed,
        RTCIceConnectionState::Closed => TransportState::Closed,
        _ => return None,
    })
}

#[async_trait]
impl RemoteTrack for TrackRemote {
    fn kind(&self) -> MediaKind {
        match TrackRemote::kind(self) {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }

    fn id(&self) -> String {
        TrackRemote::id(self)
    }

    fn stream_id(&self) -> String {
        TrackRemote::stream_id(self)
    }

    async fn read_packet(&self) -> Option<rtp::packet::Packet> {
        self.read_rtp().await.ok().map(|(packet, _)| packet)
    }
}

/// Creates [`PeerSession`]s
#[derive(Debug, Default, Clone)]
pub struct PeerFactory;

impl PeerFactory {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl MediaFactory for PeerFactory {
    async fn create(
        &self,
        session_id: &str,
        relay_servers: &[RelayServer],
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Arc<dyn MediaSession>> {
        let session = PeerSession::new(session_id, relay_servers, events).await?;
        Ok(Arc::new(session))
    }
}

/// Peer connection with one audio and one video transceiver
pub struct PeerSession {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
}

impl PeerSession {
    /// Create a new peer connection
    pub async fn new(
        session_id: &str,
        relay_servers: &[RelayServer],
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtcError(format!("Failed to register codecs: {}", e)))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine).map_err(|e| {
            AppError::WebRtcError(format!("Failed to register interceptors: {}", e))
        })?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let rtc_config = RTCConfiguration {
            ice_servers: ice_servers(relay_servers),
            ..Default::default()
        };

        let pc = api.new_peer_connection(rtc_config).await.map_err(|e| {
            AppError::WebRtcError(format!("Failed to create peer connection: {}", e))
        })?;
        let pc = Arc::new(pc);

        // Cameras expect sendrecv on both lines even though we only receive
        for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
            pc.add_transceiver_from_kind(
                kind,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Sendrecv,
                    send_encodings: vec![],
                }),
            )
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add {} transceiver: {}", kind, e)))?;
        }

        let session = Self {
            session_id: session_id.to_string(),
            pc,
        };
        session.setup_event_handlers(events);

        info!("Peer connection created for session {}", session.session_id);
        Ok(session)
    }

    /// Forward peer connection callbacks as [`MediaEvent`]s
    fn setup_event_handlers(&self, events: mpsc::UnboundedSender<MediaEvent>) {
        let session_id = self.session_id.clone();
        let state_events = events.clone();
        self.pc
            .on_ice_connection_state_change(Box::new(move |state: RTCIceConnectionState| {
                let events = state_events.clone();
                let session_id = session_id.clone();
                Box::pin(async move {
                    debug!("[ICE] Session {} connection state: {}", session_id, state);
                    if let Some(state) = transport_state(state) {
                        let _ = events.send(MediaEvent::Transport(state));
                    }
                })
            }));

        let candidate_events = events.clone();
        self.pc
            .on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
                let events = candidate_events.clone();
                Box::pin(async move {
                    let Some(c) = candidate else {
                        return;
                    };
                    match c.to_json() {
                        Ok(init) => {
                            debug!("Local ICE candidate: {}", init.candidate);
                            let _ = events.send(MediaEvent::LocalCandidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                                username_fragment: init.username_fragment,
                            }));
                        }
                        Err(e) => debug!("Failed to serialize local candidate: {}", e),
                    }
                })
            }));

        let session_id = self.session_id.clone();
        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = events.clone();
                let session_id = session_id.clone();
                Box::pin(async move {
                    info!(
                        "Session {} received {} track {}",
                        session_id,
                        track.kind(),
                        TrackRemote::id(&track)
                    );
                    let _ = events.send(MediaEvent::Track(track));
                })
            },
        ));
    }
}

#[async_trait]
impl MediaSession for PeerSession {
    async fn create_offer(&self) -> Result<String> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to create offer: {}", e)))?;

        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set local description: {}", e)))?;

        Ok(offer.sdp)
    }

    async fn apply_remote(&self, description: &SessionDescription) -> Result<()> {
        let sdp = match description.kind {
            DescriptionKind::Offer => RTCSessionDescription::offer(description.sdp.clone()),
            DescriptionKind::Answer => RTCSessionDescription::answer(description.sdp.clone()),
        }
        .map_err(|e| AppError::WebRtcError(format!("Invalid SDP {}: {}", description.kind, e)))?;

        self.pc
            .set_remote_description(sdp)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to set remote description: {}", e)))
    }

    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };

        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to add ICE candidate: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        self.pc
            .close()
            .await
            .map_err(|e| AppError::WebRtcError(format!("Failed to close peer connection: {}", e)))?;
        info!("Peer connection closed for session {}", self.session_id);
        Ok(())
    }
}
