//! Signaling relay channel
//!
//! Offers, answers and ICE candidates travel over a WebSocket to the relay,
//! each message addressed to a peer by client identifier:
//!
//! ```text
//! outbound: {"action":"SDP_OFFER","messagePayload":"<base64 json>","recipientClientId":"..."}
//! inbound:  {"messageType":"SDP_ANSWER","messagePayload":"<base64 json>",...}
//! ```

pub mod channel;
pub mod envelope;

pub use channel::{ChannelEvent, OpenedChannel, SignalingChannel, SignalingConnector, WsConnector};
pub use envelope::{
    decode_inbound, encode_outbound, DescriptionKind, IceCandidate, MessageType,
    SessionDescription, SignalingEnvelope,
};
