//! Domain models carried over the real-time channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RealtimeError;

// --- Session ---

/// Role supplied by the authenticated collaborator at session start.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Worker,
    Admin,
}

impl Role {
    /// Whether this role receives the per-customer channel.
    pub fn watches_customer_channel(self) -> bool {
        matches!(self, Role::Customer | Role::Admin)
    }

    /// Whether this role receives the per-worker channel.
    pub fn watches_worker_channel(self) -> bool {
        matches!(self, Role::Worker | Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Customer => "customer",
            Role::Worker => "worker",
            Role::Admin => "admin",
        };
        f.write_str(name)
    }
}

impl FromStr for Role {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "customer" => Ok(Role::Customer),
            "worker" => Ok(Role::Worker),
            "admin" => Ok(Role::Admin),
            other => Err(RealtimeError::config(format!("unknown role '{}'", other))),
        }
    }
}

// --- Geography ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Location {
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
}

// --- Pickups ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PickupStatus {
    Pending,
    Scheduled,
    Accepted,
    EnRoute,
    InProgress,
    Completed,
    Cancelled,
    /// Any status this client does not know about yet.
    #[serde(other)]
    Unknown,
}

impl PickupStatus {
    /// Completed and cancelled pickups drop out of the active view.
    pub fn is_terminal(self) -> bool {
        matches!(self, PickupStatus::Completed | PickupStatus::Cancelled)
    }
}

/// Latest known state of one pickup, keyed by `id`.
///
/// `updated_at` is carried but not used for conflict resolution: the store
/// applies the last update to arrive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PickupUpdate {
    pub id: u64,
    pub status: PickupStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_time: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

// --- Workers ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Online,
    Busy,
    Offline,
}

impl WorkerStatus {
    /// Online and busy workers are both counted as present.
    pub fn is_present(self) -> bool {
        matches!(self, WorkerStatus::Online | WorkerStatus::Busy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerUpdate {
    pub id: u64,
    pub status: WorkerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_pickups: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

// --- Notifications ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

/// An entry of the bounded notification feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SystemNotification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub read: bool,
}

/// The caller-supplied part of a notification; the store fills in the rest.
///
/// This is also the payload shape of inbound `notification` messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewNotification {
    #[serde(rename = "type", default)]
    pub kind: NotificationKind,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub message: String,
}

impl NewNotification {
    pub fn new(kind: NotificationKind, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn info(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Info, title, message)
    }

    pub fn warning(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Warning, title, message)
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Error, title, message)
    }

    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(NotificationKind::Success, title, message)
    }
}

// --- Chat ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room_id: Option<String>,
    pub sender_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub message_id: u64,
    pub user_id: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TypingIndicator {
    pub user_id: u64,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub user_id: u64,
    pub online: bool,
}
