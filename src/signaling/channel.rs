//! Signaling channel over WebSocket

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, trace, warn};

use super::envelope::{decode_inbound, encode_outbound, SignalingEnvelope};
use crate::error::{AppError, Result};

/// Event raised by an open signaling channel
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A decoded inbound message
    Envelope(SignalingEnvelope),
    /// Socket error; the channel is no longer open
    Error(String),
    /// The relay closed the socket
    Closed,
}

/// Duplex message channel to the signaling relay
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Whether outbound messages are currently delivered
    fn is_open(&self) -> bool;

    /// Send `envelope` to `recipient`
    ///
    /// Silently dropped (not queued) while the channel is not open.
    fn send(&self, envelope: &SignalingEnvelope, recipient: &str);

    /// Close the channel. Safe to call repeatedly.
    async fn close(&self);
}

/// A freshly opened channel and its inbound event stream
pub struct OpenedChannel {
    pub channel: Arc<dyn SignalingChannel>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
}

/// Opens signaling channels
#[async_trait]
pub trait SignalingConnector: Send + Sync {
    async fn open(&self, relay_url: &str) -> Result<OpenedChannel>;
}

/// WebSocket signaling connector
#[derive(Debug, Default, Clone)]
pub struct WsConnector;

impl WsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SignalingConnector for WsConnector {
    async fn open(&self, relay_url: &str) -> Result<OpenedChannel> {
        let (ws_stream, _) = connect_async(relay_url)
            .await
            .map_err(|e| AppError::SignalingChannel(format!("websocket connect failed: {}", e)))?;
        info!("Signaling channel connected");

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        let (event_tx, event_rx) = mpsc::unbounded_channel::<ChannelEvent>();
        let open = Arc::new(AtomicBool::new(true));

        // Writer: drains the outbound queue, stops after sending Close
        tokio::spawn(async move {
            while let Some(message) = out_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = ws_write.send(message).await {
                    debug!("Signaling write failed: {}", e);
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        let reader_open = open.clone();
        let reader = tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        forward_frame(&text.to_string(), &event_tx);
                    }
                    Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                        Ok(text) => forward_frame(text, &event_tx),
                        Err(_) => debug!("Ignoring {} byte binary signaling frame", data.len()),
                    },
                    Ok(Message::Close(frame)) => {
                        debug!("Relay sent close: {:?}", frame);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        if reader_open.swap(false, Ordering::SeqCst) {
                            warn!("Signaling channel error: {}", e);
                            let _ = event_tx.send(ChannelEvent::Error(e.to_string()));
                        }
                        return;
                    }
                }
            }

            // Only report closes we did not initiate
            if reader_open.swap(false, Ordering::SeqCst) {
                info!("Signaling channel closed by relay");
                let _ = event_tx.send(ChannelEvent::Closed);
            }
        });

        let channel = WsChannel {
            open,
            out_tx,
            reader: Mutex::new(Some(reader)),
        };

        Ok(OpenedChannel {
            channel: Arc::new(channel),
            events: event_rx,
        })
    }
}

/// Decode a text frame and forward it; malformed frames are dropped here
fn forward_frame(raw: &str, event_tx: &mpsc::UnboundedSender<ChannelEvent>) {
    match decode_inbound(raw) {
        Ok(Some(envelope)) => {
            let _ = event_tx.send(ChannelEvent::Envelope(envelope));
        }
        Ok(None) => trace!("Ignoring empty signaling frame"),
        Err(e) => warn!("Discarding signaling message: {}", e),
    }
}

struct WsChannel {
    open: Arc<AtomicBool>,
    out_tx: mpsc::UnboundedSender<Message>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl SignalingChannel for WsChannel {
    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn send(&self, envelope: &SignalingEnvelope, recipient: &str) {
        if !self.is_open() {
            trace!("Signaling channel not open, dropping outbound message");
            return;
        }

        match encode_outbound(envelope, recipient) {
            Ok(text) => {
                if self.out_tx.send(Message::Text(text.into())).is_err() {
                    debug!("Signaling writer gone, dropping outbound message");
                }
            }
            Err(e) => warn!("Failed to encode signaling message: {}", e),
        }
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            let _ = self.out_tx.send(Message::Close(None));
            debug!("Signaling channel closing");
        }
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::envelope::SessionDescription;
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use tokio::net::TcpListener;

    /// Minimal relay: accepts one client, sends `frames`, then echoes every
    /// received text frame into `received`.
    async fn spawn_relay(
        frames: Vec<String>,
        close_after: bool,
    ) -> (String, mpsc::UnboundedReceiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (received_tx, received_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            for frame in frames {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            if close_after {
                let _ = ws.close(None).await;
                return;
            }
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let _ = received_tx.send(text.to_string());
                }
            }
        });

        (format!("ws://{}", addr), received_rx)
    }

    #[tokio::test]
    async fn test_inbound_frames_are_decoded_and_malformed_dropped() {
        let answer = serde_json::json!({
            "messageType": "SDP_ANSWER",
            "messagePayload": BASE64.encode(r#"{"type":"answer","sdp":"v=0"}"#),
        })
        .to_string();
        let (url, _received) = spawn_relay(
            vec!["garbage".to_string(), String::new(), answer],
            false,
        )
        .await;

        let mut opened = WsConnector::new().open(&url).await.unwrap();
        assert!(opened.channel.is_open());

        let event = opened.events.recv().await.unwrap();
        assert_eq!(
            event,
            ChannelEvent::Envelope(SignalingEnvelope::Description(SessionDescription::answer(
                "v=0"
            )))
        );
        opened.channel.close().await;
    }

    #[tokio::test]
    async fn test_send_reaches_relay_and_is_dropped_after_close() {
        let (url, mut received) = spawn_relay(vec![], false).await;
        let opened = WsConnector::new().open(&url).await.unwrap();

        let offer = SignalingEnvelope::Description(SessionDescription::offer("v=0"));
        opened.channel.send(&offer, "peer-9");
        let frame = received.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["action"], "SDP_OFFER");
        assert_eq!(value["recipientClientId"], "peer-9");

        opened.channel.close().await;
        opened.channel.close().await;
        assert!(!opened.channel.is_open());
        opened.channel.send(&offer, "peer-9");
        assert!(received.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_remote_close_is_reported() {
        let (url, _received) = spawn_relay(vec![], true).await;
        let mut opened = WsConnector::new().open(&url).await.unwrap();

        let event = opened.events.recv().await.unwrap();
        assert!(matches!(event, ChannelEvent::Closed | ChannelEvent::Error(_)));
        assert!(!opened.channel.is_open());
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = WsConnector::new().open(&format!("ws://{}", addr)).await;
        assert!(matches!(result, Err(AppError::SignalingChannel(_))));
    }
}
