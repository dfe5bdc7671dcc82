//! Inbound EventSub frame model.
//!
//! Every text frame received on the session is decoded into a [`Frame`], a
//! closed set of message kinds that the session manager matches exhaustively.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportResult;

/// Session descriptor carried by welcome and reconnect frames.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default)]
    pub keepalive_timeout_seconds: Option<u64>,
    #[serde(default)]
    pub reconnect_url: Option<String>,
}

/// Subscription metadata attached to notification and revocation frames.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct SubscriptionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub condition: BTreeMap<String, String>,
}

/// One occurrence of a subscribed event.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct Notification {
    pub subscription: SubscriptionInfo,
    #[serde(default)]
    pub event: Value,
}

impl Notification {
    /// The subscription type tag, e.g. `channel.chat.message`.
    pub fn kind(&self) -> &str {
        &self.subscription.kind
    }
}

/// A decoded inbound frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Frame {
    /// Handshake carrying a fresh session.
    Welcome(SessionInfo),
    /// Liveness only.
    Keepalive,
    /// The server wants the client to move to `reconnect_url`.
    Reconnect(SessionInfo),
    /// A subscription was revoked by the server.
    Revocation(SubscriptionInfo),
    /// A subscribed event.
    Notification(Notification),
    /// Any other message type; ignored.
    Unknown { message_type: Option<String> },
}

#[derive(Default, Deserialize)]
struct Metadata {
    #[serde(default)]
    message_type: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    metadata: Metadata,
    #[serde(default)]
    message_type: Option<String>,
    #[serde(default)]
    payload: Value,
}

#[derive(Deserialize)]
struct SessionPayload {
    session: SessionInfo,
}

#[derive(Deserialize)]
struct RevocationPayload {
    subscription: SubscriptionInfo,
}

impl Frame {
    /// Decode a text frame.
    ///
    /// Returns an error if the text is not JSON or a known message type has a
    /// payload of the wrong shape.
    pub fn parse(text: &str) -> TransportResult<Self> {
        let envelope: Envelope = serde_json::from_str(text)?;
        let message_type = envelope.metadata.message_type.or(envelope.message_type);

        let frame = match message_type.as_deref() {
            Some("session_welcome") => {
                let payload: SessionPayload = serde_json::from_value(envelope.payload)?;
                Self::Welcome(payload.session)
            }
            Some("session_keepalive") => Self::Keepalive,
            Some("session_reconnect") => {
                let payload: SessionPayload = serde_json::from_value(envelope.payload)?;
                Self::Reconnect(payload.session)
            }
            Some("revocation") => {
                let payload: RevocationPayload = serde_json::from_value(envelope.payload)?;
                Self::Revocation(payload.subscription)
            }
            Some("notification") => Self::Notification(serde_json::from_value(envelope.payload)?),
            _ => Self::Unknown { message_type },
        };
        Ok(frame)
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Welcome(_) => "session_welcome",
            Self::Keepalive => "session_keepalive",
            Self::Reconnect(_) => "session_reconnect",
            Self::Revocation(_) => "revocation",
            Self::Notification(_) => "notification",
            Self::Unknown { .. } => "unknown",
        }
    }
}
