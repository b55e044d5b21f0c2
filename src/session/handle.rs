//! Session handle and teardown

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::state::{ConnectionState, SessionStatus};
use crate::media::MediaSession;
use crate::signaling::SignalingChannel;

/// Transition history kept for slow subscribers
const TRANSITION_CAPACITY: usize = 64;

/// State shared between a [`SessionHandle`] and its negotiator task
pub(crate) struct SessionShared {
    session_id: String,
    cancel: CancellationToken,
    status_tx: watch::Sender<SessionStatus>,
    transitions_tx: broadcast::Sender<SessionStatus>,
    channel: Mutex<Option<Arc<dyn SignalingChannel>>>,
    media: Mutex<Option<Arc<dyn MediaSession>>>,
    torn_down: AtomicBool,
}

impl SessionShared {
    pub(crate) fn new(session_id: String) -> Self {
        let (status_tx, _) = watch::channel(SessionStatus::new(ConnectionState::New));
        let (transitions_tx, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            session_id,
            cancel: CancellationToken::new(),
            status_tx,
            transitions_tx,
            channel: Mutex::new(None),
            media: Mutex::new(None),
            torn_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn session_id(&self) -> &str {
        &self.session_id
    }

    pub(crate) fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Publish a status change
    ///
    /// Dropped once the session is cancelled: nothing reaches subscribers
    /// after teardown.
    pub(crate) fn publish(&self, status: SessionStatus) -> bool {
        let cancel = &self.cancel;
        let transitions = &self.transitions_tx;
        let session_id = &self.session_id;
        self.status_tx.send_if_modified(|current| {
            if cancel.is_cancelled() || current.state == ConnectionState::Closed {
                debug!("Session {} dropping late status {}", session_id, status.state);
                return false;
            }
            match &status.message {
                Some(message) => info!("Session {} -> {}: {}", session_id, status.state, message),
                None => info!("Session {} -> {}", session_id, status.state),
            }
            *current = status.clone();
            let _ = transitions.send(status.clone());
            true
        })
    }

    /// Register the open signaling channel
    ///
    /// Returns `false` when the session was already torn down; the caller
    /// then owns the channel and must close it.
    pub(crate) fn adopt_channel(&self, channel: Arc<dyn SignalingChannel>) -> bool {
        let mut slot = self.channel.lock();
        if self.torn_down.load(Ordering::SeqCst) {
            return false;
        }
        *slot = Some(channel);
        true
    }

    /// Register the media session, same contract as [`Self::adopt_channel`]
    pub(crate) fn adopt_media(&self, media: Arc<dyn MediaSession>) -> bool {
        let mut slot = self.media.lock();
        if self.torn_down.load(Ordering::SeqCst) {
            return false;
        }
        *slot = Some(media);
        true
    }

    pub(crate) fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::SeqCst)
    }

    /// Stop the attempt and release its resources
    ///
    /// Idempotent: only the first call cancels, publishes `closed` and closes
    /// the channel and media session.
    pub(crate) async fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::SeqCst) {
            debug!("Session {} already torn down", self.session_id);
            return;
        }
        self.cancel.cancel();

        let transitions = &self.transitions_tx;
        self.status_tx.send_if_modified(|current| {
            if current.state == ConnectionState::Closed {
                return false;
            }
            let closed = SessionStatus::new(ConnectionState::Closed);
            *current = closed.clone();
            let _ = transitions.send(closed);
            true
        });

        let channel = self.channel.lock().take();
        if let Some(channel) = channel {
            channel.close().await;
        }

        let media = self.media.lock().take();
        if let Some(media) = media {
            if let Err(e) = media.close().await {
                warn!("Session {} media close failed: {}", self.session_id, e);
            }
        }

        info!("Session {} torn down", self.session_id);
    }
}

/// Handle to one live-view connection attempt
///
/// Dropping the handle tears the session down in the background.
pub struct SessionHandle {
    shared: Arc<SessionShared>,
    camera_id: String,
    status_rx: watch::Receiver<SessionStatus>,
}

impl SessionHandle {
    pub(crate) fn new(shared: Arc<SessionShared>, camera_id: String) -> Self {
        let status_rx = shared.status_tx.subscribe();
        Self {
            shared,
            camera_id,
            status_rx,
        }
    }

    pub fn session_id(&self) -> &str {
        self.shared.session_id()
    }

    pub fn camera_id(&self) -> &str {
        &self.camera_id
    }

    /// Current state and failure message
    pub fn status(&self) -> SessionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state
    }

    pub fn message(&self) -> Option<String> {
        self.status_rx.borrow().message.clone()
    }

    /// Watch the latest status
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_rx.clone()
    }

    /// Receive every subsequent status change in order
    pub fn transitions(&self) -> broadcast::Receiver<SessionStatus> {
        self.shared.transitions_tx.subscribe()
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.is_cancelled()
    }

    /// Stop the attempt and release the channel and media session
    pub async fn teardown(&self) {
        self.shared.teardown().await;
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.shared.is_torn_down() {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let shared = self.shared.clone();
                runtime.spawn(async move {
                    shared.teardown().await;
                });
            }
            Err(_) => {
                // No runtime left to close resources on; at least stop the negotiator
                self.shared.cancel.cancel();
            }
        }
    }
}

/// Tear down `handle`'s session
pub async fn teardown(handle: &SessionHandle) {
    handle.teardown().await;
}
