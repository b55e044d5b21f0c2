//! Signaling wire codec

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};

/// Relay message types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    SdpOffer,
    SdpAnswer,
    IceCandidate,
    StatusResponse,
}

/// Offer or answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl DescriptionKind {
    fn as_str(&self) -> &'static str {
        match self {
            DescriptionKind::Offer => "offer",
            DescriptionKind::Answer => "answer",
        }
    }

    fn message_type(&self) -> MessageType {
        match self {
            DescriptionKind::Offer => MessageType::SdpOffer,
            DescriptionKind::Answer => MessageType::SdpAnswer,
        }
    }
}

impl std::fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session description carried by an offer/answer envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    pub sdp: String,
    /// The `type` field of the payload as sent by the peer
    pub session_type: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
            session_type: "offer".to_string(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
            session_type: "answer".to_string(),
        }
    }
}

/// ICE candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// Candidate string
    pub candidate: String,
    /// SDP mid (media ID)
    #[serde(rename = "sdpMid", default)]
    pub sdp_mid: Option<String>,
    /// SDP mline index
    #[serde(rename = "sdpMLineIndex", default)]
    pub sdp_mline_index: Option<u16>,
    /// Username fragment
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }

    pub fn with_mid(mut self, mid: impl Into<String>, index: u16) -> Self {
        self.sdp_mid = Some(mid.into());
        self.sdp_mline_index = Some(index);
        self
    }
}

/// Decoded signaling message
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEnvelope {
    Description(SessionDescription),
    Candidate(IceCandidate),
    /// Relay status report; logged, never acted on
    Status(Value),
}

#[derive(Serialize, Deserialize)]
struct DescriptionPayload {
    #[serde(rename = "type", default)]
    session_type: Option<String>,
    sdp: String,
}

#[derive(Serialize)]
struct OutboundMessage<'a> {
    action: MessageType,
    #[serde(rename = "messagePayload")]
    message_payload: String,
    #[serde(rename = "recipientClientId")]
    recipient_client_id: &'a str,
}

#[derive(Deserialize)]
struct InboundMessage {
    #[serde(rename = "messageType")]
    message_type: String,
    #[serde(rename = "messagePayload", default)]
    message_payload: Option<String>,
    #[serde(rename = "statusResponse", default)]
    status_response: Option<Value>,
}

/// Encode an envelope into a relay text frame addressed to `recipient`
pub fn encode_outbound(envelope: &SignalingEnvelope, recipient: &str) -> Result<String> {
    let (action, payload) = match envelope {
        SignalingEnvelope::Description(desc) => (
            desc.kind.message_type(),
            serde_json::to_vec(&DescriptionPayload {
                session_type: Some(desc.kind.as_str().to_string()),
                sdp: desc.sdp.clone(),
            })?,
        ),
        SignalingEnvelope::Candidate(candidate) => {
            (MessageType::IceCandidate, serde_json::to_vec(candidate)?)
        }
        SignalingEnvelope::Status(_) => {
            return Err(AppError::BadRequest(
                "status envelopes cannot be sent".to_string(),
            ))
        }
    };

    let message = OutboundMessage {
        action,
        message_payload: BASE64.encode(payload),
        recipient_client_id: recipient,
    };
    Ok(serde_json::to_string(&message)?)
}

fn decode_payload(encoded: &str) -> Result<Value> {
    let bytes = BASE64
        .decode(encoded.trim())
        .map_err(|e| AppError::MalformedMessage(format!("payload is not base64: {}", e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AppError::MalformedMessage(format!("payload is not JSON: {}", e)))
}

/// Decode one relay text frame
///
/// Returns `Ok(None)` for frames that carry nothing (empty keep-alives).
pub fn decode_inbound(raw: &str) -> Result<Option<SignalingEnvelope>> {
    if raw.trim().is_empty() {
        return Ok(None);
    }

    let message: InboundMessage = serde_json::from_str(raw)
        .map_err(|e| AppError::MalformedMessage(format!("frame is not JSON: {}", e)))?;

    let message_type: MessageType =
        serde_json::from_value(Value::String(message.message_type.clone())).map_err(|_| {
            AppError::MalformedMessage(format!("unknown message type {}", message.message_type))
        })?;

    let payload = match message.message_payload.as_deref() {
        Some(encoded) if !encoded.is_empty() => Some(decode_payload(encoded)?),
        _ => None,
    };

    let envelope = match message_type {
        MessageType::SdpOffer | MessageType::SdpAnswer => {
            let kind = if message_type == MessageType::SdpOffer {
                DescriptionKind::Offer
            } else {
                DescriptionKind::Answer
            };
            let payload = payload.ok_or_else(|| {
                AppError::MalformedMessage(format!("{} without payload", kind))
            })?;
            let body: DescriptionPayload = serde_json::from_value(payload)
                .map_err(|e| AppError::MalformedMessage(format!("bad {} payload: {}", kind, e)))?;
            SignalingEnvelope::Description(SessionDescription {
                kind,
                sdp: body.sdp,
                session_type: body
                    .session_type
                    .unwrap_or_else(|| kind.as_str().to_string()),
            })
        }
        MessageType::IceCandidate => {
            let payload = payload.ok_or_else(|| {
                AppError::MalformedMessage("candidate without payload".to_string())
            })?;
            let candidate: IceCandidate = serde_json::from_value(payload)
                .map_err(|e| AppError::MalformedMessage(format!("bad candidate payload: {}", e)))?;
            SignalingEnvelope::Candidate(candidate)
        }
        MessageType::StatusResponse => SignalingEnvelope::Status(
            payload
                .or(message.status_response)
                .unwrap_or(Value::Null),
        ),
    };

    Ok(Some(envelope))
}
