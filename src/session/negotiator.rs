//! Per-session negotiation task
//!
//! One task per connection attempt owns the state machine and performs every
//! step in order: bootstrap, open the channel, create the media session, send
//! the offer, then react to channel messages, media events and timers until
//! the attempt fails or is torn down. Cancellation is checked after every
//! await so late completions never publish anything.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use super::candidates::CandidateBuffer;
use super::handle::SessionShared;
use super::state::{SessionEvent, StateMachine};
use crate::bridge::BootstrapSource;
use crate::config::SessionConfig;
use crate::error::AppError;
use crate::media::{MediaEvent, MediaFactory, MediaSession, VideoSink};
use crate::signaling::{
    ChannelEvent, SessionDescription, SignalingChannel, SignalingConnector, SignalingEnvelope,
};

pub(crate) struct Negotiator {
    shared: Arc<SessionShared>,
    camera_id: String,
    bootstrap: Arc<dyn BootstrapSource>,
    connector: Arc<dyn SignalingConnector>,
    media_factory: Arc<dyn MediaFactory>,
    sink: Arc<dyn VideoSink>,
    machine: StateMachine,
    candidates: CandidateBuffer,
    remote_applied: bool,
}

/// Resources of a negotiating session
struct Live {
    channel: Arc<dyn SignalingChannel>,
    media: Arc<dyn MediaSession>,
    peer_client_id: String,
}

impl Negotiator {
    pub(crate) fn new(
        shared: Arc<SessionShared>,
        camera_id: String,
        bootstrap: Arc<dyn BootstrapSource>,
        connector: Arc<dyn SignalingConnector>,
        media_factory: Arc<dyn MediaFactory>,
        sink: Arc<dyn VideoSink>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            shared,
            camera_id,
            bootstrap,
            connector,
            media_factory,
            sink,
            machine: StateMachine::new(config),
            candidates: CandidateBuffer::new(),
            remote_applied: false,
        }
    }

    fn cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    fn advance(&mut self, event: SessionEvent) {
        if self.cancelled() {
            return;
        }
        if let Some(status) = self.machine.apply(event, Instant::now()) {
            self.shared.publish(status);
        }
    }

    pub(crate) async fn run(mut self) {
        let session_id = self.shared.session_id().to_string();
        self.advance(SessionEvent::BootstrapStarted);

        let bootstrap = self.bootstrap.fetch_bootstrap(&self.camera_id).await;
        if self.cancelled() {
            debug!("Session {} discarding bootstrap after teardown", session_id);
            return;
        }
        let bootstrap = match bootstrap {
            Ok(bootstrap) => bootstrap,
            Err(e) => {
                warn!("Session {} bootstrap failed: {}", session_id, e);
                self.advance(SessionEvent::BootstrapFailed(e.status_message()));
                return;
            }
        };
        info!(
            "Session {} bootstrap for {}: peer {}, {} relay servers",
            session_id,
            bootstrap.camera_id,
            bootstrap.peer_client_id,
            bootstrap.relay_servers.len()
        );

        let opened = self.connector.open(&bootstrap.relay_url).await;
        let opened = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Session {} signaling connect failed: {}", session_id, e);
                self.advance(SessionEvent::ChannelFailed(e.status_message()));
                return;
            }
        };
        let channel = opened.channel;
        let mut channel_events = opened.events;
        if !self.shared.adopt_channel(channel.clone()) {
            channel.close().await;
            return;
        }
        self.advance(SessionEvent::ChannelOpened);

        let (media_tx, mut media_events) = mpsc::unbounded_channel();
        let media = self
            .media_factory
            .create(&session_id, &bootstrap.relay_servers, media_tx)
            .await;
        let media = match media {
            Ok(media) => media,
            Err(e) => {
                warn!("Session {} media setup failed: {}", session_id, e);
                self.advance(SessionEvent::MediaFailed(e.status_message()));
                return;
            }
        };
        if !self.shared.adopt_media(media.clone()) {
            if let Err(e) = media.close().await {
                debug!("Session {} media close failed: {}", session_id, e);
            }
            return;
        }

        self.advance(SessionEvent::NegotiationStarted);
        let offer = media.create_offer().await;
        if self.cancelled() {
            return;
        }
        let sdp = match offer {
            Ok(sdp) => sdp,
            Err(e) => {
                warn!("Session {} offer failed: {}", session_id, e);
                self.advance(SessionEvent::MediaFailed(e.status_message()));
                return;
            }
        };
        self.advance(SessionEvent::OfferCreated);
        channel.send(
            &SignalingEnvelope::Description(SessionDescription::offer(sdp)),
            &bootstrap.peer_client_id,
        );
        info!(
            "Session {} sent offer to {}",
            session_id, bootstrap.peer_client_id
        );

        let live = Live {
            channel,
            media,
            peer_client_id: bootstrap.peer_client_id,
        };
        let cancel = self.shared.cancel_token().clone();
        let mut channel_open = true;
        let mut media_open = true;

        loop {
            if self.cancelled() || self.machine.state().is_terminal() {
                break;
            }
            let deadline = self.machine.next_deadline();

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = sleep_until(deadline) => {
                    if let Some(status) = self.machine.poll_timers(Instant::now()) {
                        if !self.cancelled() {
                            self.shared.publish(status);
                        }
                    }
                }

                event = channel_events.recv(), if channel_open => match event {
                    Some(event) => self.on_channel_event(event, &live).await,
                    None => channel_open = false,
                },

                event = media_events.recv(), if media_open => match event {
                    Some(event) => self.on_media_event(event, &live),
                    None => media_open = false,
                },
            }
        }

        debug!(
            "Session {} negotiator finished in state {}",
            session_id,
            self.machine.state()
        );
    }

    async fn on_channel_event(&mut self, event: ChannelEvent, live: &Live) {
        match event {
            ChannelEvent::Envelope(SignalingEnvelope::Description(description)) => {
                self.on_remote_description(description, live).await;
            }
            ChannelEvent::Envelope(SignalingEnvelope::Candidate(candidate)) => {
                if self.remote_applied {
                    if let Err(e) = live.media.add_candidate(&candidate).await {
                        warn!("Skipping remote candidate: {}", e);
                    }
                } else {
                    debug!(
                        "Buffering remote candidate ({} pending)",
                        self.candidates.len() + 1
                    );
                    self.candidates.push(candidate);
                }
            }
            ChannelEvent::Envelope(SignalingEnvelope::Status(status)) => {
                debug!("Relay status: {}", status);
            }
            ChannelEvent::Error(e) => {
                warn!("Signaling channel error: {}", e);
                self.advance(SessionEvent::ChannelFailed(
                    AppError::SignalingChannel(e).status_message(),
                ));
            }
            ChannelEvent::Closed => {
                self.advance(SessionEvent::ChannelClosed);
            }
        }
    }

    async fn on_remote_description(&mut self, description: SessionDescription, live: &Live) {
        let result = live.media.apply_remote(&description).await;
        if self.cancelled() {
            return;
        }
        if let Err(e) = result {
            warn!("Ignoring remote {}: {}", description.kind, e);
            return;
        }
        info!(
            "Session {} applied remote {}",
            self.shared.session_id(),
            description.kind
        );
        self.remote_applied = true;

        let pending = self.candidates.drain();
        if !pending.is_empty() {
            debug!("Applying {} buffered remote candidates", pending.len());
        }
        for candidate in pending {
            if let Err(e) = live.media.add_candidate(&candidate).await {
                warn!("Skipping buffered candidate: {}", e);
            }
            if self.cancelled() {
                return;
            }
        }
    }

    fn on_media_event(&mut self, event: MediaEvent, live: &Live) {
        match event {
            MediaEvent::LocalCandidate(candidate) => {
                if live.channel.is_open() {
                    live.channel.send(
                        &SignalingEnvelope::Candidate(candidate),
                        &live.peer_client_id,
                    );
                } else {
                    trace!("Channel not open, dropping local candidate");
                }
            }
            MediaEvent::Transport(state) => {
                debug!("Transport state {}", state);
                self.advance(SessionEvent::Transport(state));
            }
            MediaEvent::Track(track) => {
                self.sink.bind(track);
            }
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
