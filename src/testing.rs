//! In-process fakes for the session seams

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, Notify};

use crate::bridge::{BootstrapSource, RelayServer, SessionBootstrap, BOOTSTRAP_OK};
use crate::config::SessionConfig;
use crate::error::{AppError, Result};
use crate::media::{
    MediaEvent, MediaFactory, MediaKind, MediaSession, RemoteTrack, TransportState, VideoSink,
};
use crate::session::{SessionManager, SessionStatus};
use crate::signaling::{
    ChannelEvent, DescriptionKind, IceCandidate, OpenedChannel, SessionDescription,
    SignalingChannel, SignalingConnector, SignalingEnvelope,
};

pub const RELAY_URL: &str = "wss://relay.example/channel";
pub const PEER_ID: &str = "peer-9";

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Everything buffered on a transitions receiver
pub fn drain(rx: &mut broadcast::Receiver<SessionStatus>) -> Vec<SessionStatus> {
    let mut out = vec![];
    while let Ok(status) = rx.try_recv() {
        out.push(status);
    }
    out
}

pub fn ok_bootstrap(camera_id: &str) -> SessionBootstrap {
    SessionBootstrap {
        status: BOOTSTRAP_OK.to_string(),
        camera_id: camera_id.to_string(),
        peer_client_id: PEER_ID.to_string(),
        relay_url: RELAY_URL.to_string(),
        relay_servers: vec![RelayServer::new("stun:stun.example:3478")],
    }
}

/// Scripted bridge reply
#[derive(Debug, Clone)]
pub enum Reply {
    Ok(SessionBootstrap),
    Rejected(String),
    Unreachable,
}

pub struct FakeBootstrap {
    reply: Reply,
    gate: Option<Arc<Notify>>,
    pub calls: AtomicUsize,
}

impl FakeBootstrap {
    pub fn new(reply: Reply) -> Self {
        Self {
            reply,
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Hold the reply until `gate` is notified
    pub fn gated(reply: Reply, gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::new(reply)
        }
    }
}

#[async_trait]
impl BootstrapSource for FakeBootstrap {
    async fn fetch_bootstrap(&self, _camera_id: &str) -> Result<SessionBootstrap> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        match &self.reply {
            Reply::Ok(bootstrap) => Ok(bootstrap.clone()),
            Reply::Rejected(result) => Err(AppError::SignalingRejected(result.clone())),
            Reply::Unreachable => Err(AppError::SignalingRequest),
        }
    }
}

pub struct FakeChannel {
    open: AtomicBool,
    pub sent: Mutex<Vec<(SignalingEnvelope, String)>>,
    pub closes: AtomicUsize,
}

impl FakeChannel {
    fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
            sent: Mutex::new(vec![]),
            closes: AtomicUsize::new(0),
        }
    }

    /// Mark the channel as no longer open without a close call
    pub fn drop_link(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    pub fn sent_offers(&self) -> Vec<(SessionDescription, String)> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(envelope, to)| match envelope {
                SignalingEnvelope::Description(desc) if desc.kind == DescriptionKind::Offer => {
                    Some((desc.clone(), to.clone()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn sent_candidates(&self) -> Vec<String> {
        self.sent
            .lock()
            .iter()
            .filter_map(|(envelope, _)| match envelope {
                SignalingEnvelope::Candidate(c) => Some(c.candidate.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl SignalingChannel for FakeChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: &SignalingEnvelope, recipient: &str) {
        if self.is_open() {
            self.sent
                .lock()
                .push((envelope.clone(), recipient.to_string()));
        }
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.open.store(false, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub fail: bool,
    pub opened: Mutex<Vec<String>>,
    channel: Mutex<Option<Arc<FakeChannel>>>,
    events: Mutex<Option<mpsc::UnboundedSender<ChannelEvent>>>,
}

impl FakeConnector {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn channel(&self) -> Option<Arc<FakeChannel>> {
        self.channel.lock().clone()
    }

    /// Deliver an inbound event on the last opened channel
    pub fn inject(&self, event: ChannelEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn inject_envelope(&self, envelope: SignalingEnvelope) {
        self.inject(ChannelEvent::Envelope(envelope));
    }
}

#[async_trait]
impl SignalingConnector for FakeConnector {
    async fn open(&self, relay_url: &str) -> Result<OpenedChannel> {
        self.opened.lock().push(relay_url.to_string());
        if self.fail {
            return Err(AppError::SignalingChannel(
                "websocket connect failed: refused".to_string(),
            ));
        }

        let channel = Arc::new(FakeChannel::new());
        let (tx, rx) = mpsc::unbounded_channel();
        *self.channel.lock() = Some(channel.clone());
        *self.events.lock() = Some(tx);
        Ok(OpenedChannel {
            channel,
            events: rx,
        })
    }
}

/// Call recorded by [`FakeMedia`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaCall {
    CreateOffer,
    Remote(DescriptionKind, String),
    Candidate(String),
    Close,
}

#[derive(Default)]
pub struct FakeMedia {
    pub calls: Mutex<Vec<MediaCall>>,
    pub closes: AtomicUsize,
    /// Remote SDPs that fail to apply
    pub bad_remote: Mutex<HashSet<String>>,
    /// Candidate strings that fail to apply
    pub bad_candidates: Mutex<HashSet<String>>,
    /// Holds `create_offer` until notified
    pub offer_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeMedia {
    pub fn calls(&self) -> Vec<MediaCall> {
        self.calls.lock().clone()
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                MediaCall::Candidate(c) => Some(c.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl MediaSession for FakeMedia {
    async fn create_offer(&self) -> Result<String> {
        self.calls.lock().push(MediaCall::CreateOffer);
        let gate = self.offer_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok("v=0\r\nfake-offer".to_string())
    }

    async fn apply_remote(&self, description: &SessionDescription) -> Result<()> {
        if self.bad_remote.lock().contains(&description.sdp) {
            return Err(AppError::WebRtcError("bad sdp".to_string()));
        }
        self.calls.lock().push(MediaCall::Remote(
            description.kind,
            description.sdp.clone(),
        ));
        Ok(())
    }

    async fn add_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.calls
            .lock()
            .push(MediaCall::Candidate(candidate.candidate.clone()));
        if self.bad_candidates.lock().contains(&candidate.candidate) {
            return Err(AppError::WebRtcError("bad candidate".to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push(MediaCall::Close);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeMediaFactory {
    pub media: Arc<FakeMedia>,
    pub relay_servers: Mutex<Vec<RelayServer>>,
    events: Mutex<Option<mpsc::UnboundedSender<MediaEvent>>>,
}

impl FakeMediaFactory {
    pub fn emit(&self, event: MediaEvent) {
        if let Some(tx) = self.events.lock().as_ref() {
            let _ = tx.send(event);
        }
    }

    pub fn transport(&self, state: TransportState) {
        self.emit(MediaEvent::Transport(state));
    }
}

#[async_trait]
impl MediaFactory for FakeMediaFactory {
    async fn create(
        &self,
        _session_id: &str,
        relay_servers: &[RelayServer],
        events: mpsc::UnboundedSender<MediaEvent>,
    ) -> Result<Arc<dyn MediaSession>> {
        *self.relay_servers.lock() = relay_servers.to_vec();
        *self.events.lock() = Some(events);
        Ok(self.media.clone())
    }
}

/// Track that yields packets with the given payload sizes, then ends
pub struct FakeTrack {
    id: String,
    kind: MediaKind,
    packets: Mutex<VecDeque<rtp::packet::Packet>>,
    ended: Notify,
}

impl FakeTrack {
    pub fn new(id: &str, kind: MediaKind, payload_sizes: &[usize]) -> Self {
        let packets = payload_sizes
            .iter()
            .map(|&size| rtp::packet::Packet {
                payload: Bytes::from(vec![0u8; size]),
                ..Default::default()
            })
            .collect();
        Self {
            id: id.to_string(),
            kind,
            packets: Mutex::new(packets),
            ended: Notify::new(),
        }
    }

    /// Resolves once a reader has drained every packet
    pub async fn finished(&self) {
        self.ended.notified().await;
    }
}

#[async_trait]
impl RemoteTrack for FakeTrack {
    fn kind(&self) -> MediaKind {
        self.kind
    }

    fn id(&self) -> String {
        self.id.clone()
    }

    fn stream_id(&self) -> String {
        "stream-0".to_string()
    }

    async fn read_packet(&self) -> Option<rtp::packet::Packet> {
        let packet = self.packets.lock().pop_front();
        if packet.is_none() {
            self.ended.notify_one();
        }
        packet
    }
}

/// Sink recording bound track ids
#[derive(Default)]
pub struct RecordingSink {
    pub bound: Mutex<Vec<String>>,
}

impl VideoSink for RecordingSink {
    fn bind(&self, track: Arc<dyn RemoteTrack>) {
        self.bound.lock().push(track.id());
    }
}

/// Manager wired to fakes
pub struct Harness {
    pub bootstrap: Arc<FakeBootstrap>,
    pub connector: Arc<FakeConnector>,
    pub media: Arc<FakeMediaFactory>,
    pub sink: Arc<RecordingSink>,
    pub manager: SessionManager,
}

impl Harness {
    pub fn new(bootstrap: FakeBootstrap, connector: FakeConnector) -> Self {
        let bootstrap = Arc::new(bootstrap);
        let connector = Arc::new(connector);
        let media = Arc::new(FakeMediaFactory::default());
        let manager = SessionManager::new(
            bootstrap.clone(),
            connector.clone(),
            media.clone(),
            SessionConfig::default(),
        );
        Self {
            bootstrap,
            connector,
            media,
            sink: Arc::new(RecordingSink::default()),
            manager,
        }
    }

    /// Harness whose bridge answers "ok" for `camera_id`
    pub fn ok(camera_id: &str) -> Self {
        Self::new(
            FakeBootstrap::new(Reply::Ok(ok_bootstrap(camera_id))),
            FakeConnector::default(),
        )
    }

    pub fn channel(&self) -> Arc<FakeChannel> {
        self.connector
            .channel()
            .expect("no signaling channel was opened")
    }
}
