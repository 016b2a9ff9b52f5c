//! Wire protocol: envelope, message types, endpoint paths and id helpers.

use chrono::{SecondsFormat, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RealtimeError;
use crate::models::{
    ChatMessage, NewNotification, PickupUpdate, PresenceUpdate, ReadReceipt, TypingIndicator,
    WorkerUpdate,
};

/// Close code for a normal, intentional close. Never triggers reconnection.
pub const CLOSE_NORMAL: u16 = 1000;
/// Close code used locally when a socket failed to open or dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Message type names on the wire.
pub mod message_types {
    pub const HEARTBEAT: &str = "heartbeat";
    pub const PICKUP_UPDATE: &str = "pickup_update";
    pub const WORKER_UPDATE: &str = "worker_update";
    pub const NOTIFICATION: &str = "notification";
    pub const CHAT_MESSAGE: &str = "message";
    pub const READ: &str = "read";
    pub const TYPING: &str = "typing";
    pub const PRESENCE: &str = "presence";
    pub const SUBSCRIBE_PICKUP: &str = "subscribe_pickup";
}

/// Canonical endpoint paths.
pub mod endpoints {
    use std::fmt::Display;

    pub const PICKUP_GENERAL: &str = "/ws/pickup/general/";

    /// `/ws/pickup/{id}/`, or the general pickup feed when no id is given.
    pub fn pickup(id: Option<u64>) -> String {
        match id {
            Some(id) => format!("/ws/pickup/{}/", id),
            None => PICKUP_GENERAL.to_string(),
        }
    }

    pub fn worker(id: impl Display) -> String {
        format!("/ws/worker/{}/", id)
    }

    pub fn customer(id: impl Display) -> String {
        format!("/ws/customer/{}/", id)
    }

    pub fn chat(room_id: impl Display) -> String {
        format!("/ws/chat/{}/", room_id)
    }

    /// Normalize an endpoint path for use as a cache key (leading and trailing `/`).
    pub fn normalize(endpoint: &str) -> String {
        let trimmed = endpoint.trim().trim_matches('/');
        if trimmed.is_empty() {
            return "/".to_string();
        }
        format!("/{}/", trimmed)
    }
}

/// JSON wrapper around every message.
///
/// Outgoing envelopes always carry a generated `id` and an ISO-8601
/// `timestamp`. Inbound envelopes only need a `type`; the id is opaque and no
/// delivery guarantee is derived from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub id: String,
}

impl Envelope {
    /// Stamp a new outgoing envelope.
    pub fn outgoing(kind: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: iso_timestamp(),
            id: generate_id("msg"),
        }
    }

    /// Keep-alive frame: `{type: "heartbeat", data: {timestamp}}` with epoch milliseconds.
    pub fn heartbeat() -> Self {
        let now = Utc::now().timestamp_millis();
        Self::outgoing(
            message_types::HEARTBEAT,
            Some(serde_json::json!({ "timestamp": now })),
        )
    }

    pub fn parse(text: &str) -> Result<Self, RealtimeError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, RealtimeError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Current time as an ISO-8601 string with millisecond precision and a `Z` suffix.
pub fn iso_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `<prefix>_<epoch-ms>_<9 random base-36 chars>`, e.g. `msg_1714557600000_k3j9x0a2b`.
pub fn generate_id(prefix: &str) -> String {
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), random_suffix(9))
}

fn random_suffix(len: usize) -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Typed view of an inbound envelope.
///
/// Dispatch is a closed `match` over the known message types; anything else
/// lands in [`InboundMessage::Unknown`].
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    PickupUpdate(PickupUpdate),
    WorkerUpdate(WorkerUpdate),
    Notification(NewNotification),
    ChatMessage(ChatMessage),
    Read(ReadReceipt),
    Typing(TypingIndicator),
    Presence(PresenceUpdate),
    Heartbeat,
    Unknown { kind: String, data: Option<Value> },
}

impl InboundMessage {
    /// Decode the payload of a well-formed envelope according to its type.
    pub fn decode(envelope: &Envelope) -> Result<Self, RealtimeError> {
        use message_types::*;

        let message = match envelope.kind.as_str() {
            PICKUP_UPDATE => InboundMessage::PickupUpdate(payload(envelope)?),
            WORKER_UPDATE => InboundMessage::WorkerUpdate(payload(envelope)?),
            NOTIFICATION => InboundMessage::Notification(payload(envelope)?),
            CHAT_MESSAGE => InboundMessage::ChatMessage(payload(envelope)?),
            READ => InboundMessage::Read(payload(envelope)?),
            TYPING => InboundMessage::Typing(payload(envelope)?),
            PRESENCE => InboundMessage::Presence(payload(envelope)?),
            HEARTBEAT => InboundMessage::Heartbeat,
            other => InboundMessage::Unknown {
                kind: other.to_string(),
                data: envelope.data.clone(),
            },
        };
        Ok(message)
    }

    /// The wire type name this message was decoded from.
    pub fn kind(&self) -> &str {
        use message_types::*;

        match self {
            InboundMessage::PickupUpdate(_) => PICKUP_UPDATE,
            InboundMessage::WorkerUpdate(_) => WORKER_UPDATE,
            InboundMessage::Notification(_) => NOTIFICATION,
            InboundMessage::ChatMessage(_) => CHAT_MESSAGE,
            InboundMessage::Read(_) => READ,
            InboundMessage::Typing(_) => TYPING,
            InboundMessage::Presence(_) => PRESENCE,
            InboundMessage::Heartbeat => HEARTBEAT,
            InboundMessage::Unknown { kind, .. } => kind.as_str(),
        }
    }
}

fn payload<T: serde::de::DeserializeOwned>(envelope: &Envelope) -> Result<T, RealtimeError> {
    let data = envelope.data.clone().ok_or_else(|| {
        RealtimeError::protocol(format!("'{}' message without data", envelope.kind))
    })?;
    serde_json::from_value(data)
        .map_err(|e| RealtimeError::protocol(format!("invalid '{}' payload: {}", envelope.kind, e)))
}
