//! WebSocket connection with state management and auto-reconnect.
//!
//! This module provides the shared types, the transport seam and the
//! tokio-tungstenite implementation of it.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};
use pickup_live_shared::{Envelope, InboundMessage, RealtimeError};

mod connection_native;
mod state_machine;

#[cfg(test)]
pub(crate) mod mock;

pub use connection_native::TungsteniteConnector;
pub use state_machine::{Connection, ListenerId, WeakConnection};

/// Connection state for a WebSocket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Error,
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnecting => "reconnecting",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Configuration for one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// Full socket URL without the token query.
    pub url: String,
    pub token: Option<String>,
    pub auto_reconnect: bool,
    /// Base delay of the reconnection backoff.
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    /// Zero disables the heartbeat.
    pub heartbeat_interval: Duration,
    /// Log frame-level traffic.
    pub debug: bool,
}

impl ConnectionConfig {
    pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(3_000);
    pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
    pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
            auto_reconnect: true,
            reconnect_interval: Self::DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: Self::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: Self::DEFAULT_HEARTBEAT_INTERVAL,
            debug: false,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// The URL actually dialled: `url[?token=<percent-encoded>]`.
    pub fn socket_url(&self) -> String {
        match self.token.as_deref() {
            Some(token) => {
                let separator = if self.url.contains('?') { '&' } else { '?' };
                format!(
                    "{}{}token={}",
                    self.url,
                    separator,
                    urlencoding::encode(token)
                )
            }
            None => self.url.clone(),
        }
    }
}

/// Per-field overrides applied on top of a registry-built [`ConnectionConfig`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionOptions {
    pub token: Option<String>,
    pub auto_reconnect: Option<bool>,
    pub reconnect_interval: Option<Duration>,
    pub max_reconnect_attempts: Option<u32>,
    pub heartbeat_interval: Option<Duration>,
    pub debug: Option<bool>,
}

impl ConnectionOptions {
    pub fn auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = Some(enabled);
        self
    }

    pub fn reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval = Some(interval);
        self
    }

    pub fn max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = Some(attempts);
        self
    }

    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = Some(interval);
        self
    }

    pub fn debug(mut self, enabled: bool) -> Self {
        self.debug = Some(enabled);
        self
    }

    /// Fields set in `other` win.
    pub fn merge(self, other: ConnectionOptions) -> ConnectionOptions {
        ConnectionOptions {
            token: other.token.or(self.token),
            auto_reconnect: other.auto_reconnect.or(self.auto_reconnect),
            reconnect_interval: other.reconnect_interval.or(self.reconnect_interval),
            max_reconnect_attempts: other.max_reconnect_attempts.or(self.max_reconnect_attempts),
            heartbeat_interval: other.heartbeat_interval.or(self.heartbeat_interval),
            debug: other.debug.or(self.debug),
        }
    }

    pub fn apply_to(&self, config: &mut ConnectionConfig) {
        if let Some(token) = &self.token {
            config.token = Some(token.clone());
        }
        if let Some(v) = self.auto_reconnect {
            config.auto_reconnect = v;
        }
        if let Some(v) = self.reconnect_interval {
            config.reconnect_interval = v;
        }
        if let Some(v) = self.max_reconnect_attempts {
            config.max_reconnect_attempts = v;
        }
        if let Some(v) = self.heartbeat_interval {
            config.heartbeat_interval = v;
        }
        if let Some(v) = self.debug {
            config.debug = v;
        }
    }
}

/// Counters for one connection. `uptime` is derived when the snapshot is taken.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionStats {
    pub connect_time: Option<DateTime<Utc>>,
    pub reconnect_count: u32,
    pub messages_sent: u64,
    pub messages_received: u64,
    pub parse_errors: u64,
    pub last_error: Option<String>,
    pub uptime: Duration,
}

/// Registry-facing summary of one connection.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionInfo {
    pub endpoint: String,
    pub state: ConnectionState,
    pub stats: ConnectionStats,
    pub last_error: Option<String>,
}

/// Everything a connection reports to its listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Connecting,
    Connected,
    Disconnected { code: u16, reason: String },
    /// A reconnection attempt has been scheduled `delay` from now.
    Reconnecting { attempt: u32, delay: Duration },
    /// Emitted once when automatic reconnection gives up.
    ReconnectFailed { attempts: u32 },
    Error(RealtimeError),
    /// Every well-formed inbound envelope.
    Message(Envelope),
    /// Typed view of an inbound envelope.
    Inbound(InboundMessage),
    MessageSent(Envelope),
    SendError { kind: String, error: RealtimeError },
    ParseError { raw: String, error: RealtimeError },
}

// --- Transport seam ---

/// Frames written to the socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close { code: u16, reason: String },
}

/// What the socket reports back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    /// A transport error; a `Closed` event follows if the socket went away.
    Error(String),
    Closed { code: u16, reason: String },
}

/// An open socket, as a pair of channels.
///
/// Dropping every `outbound` sender closes the socket.
pub struct Transport {
    pub outbound: UnboundedSender<OutboundFrame>,
    pub inbound: UnboundedReceiver<TransportEvent>,
}

/// Opens sockets. Implemented over tokio-tungstenite for production and in
/// memory for tests.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<Transport, RealtimeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_url_percent_encodes_the_token() {
        let config = ConnectionConfig::new("wss://api.example.com/ws/pickup/general/")
            .with_token("a b&c=d");
        assert_eq!(
            config.socket_url(),
            "wss://api.example.com/ws/pickup/general/?token=a%20b%26c%3Dd"
        );
    }

    #[test]
    fn socket_url_appends_to_existing_query() {
        let config = ConnectionConfig::new("ws://localhost/ws/chat/1/?lang=en").with_token("t");
        assert_eq!(config.socket_url(), "ws://localhost/ws/chat/1/?lang=en&token=t");
        assert_eq!(
            ConnectionConfig::new("ws://localhost/x/").socket_url(),
            "ws://localhost/x/"
        );
    }

    #[test]
    fn defaults() {
        let config = ConnectionConfig::new("ws://x");
        assert!(config.auto_reconnect);
        assert_eq!(config.reconnect_interval, Duration::from_millis(3000));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(30_000));
        assert!(!config.debug);
    }

    #[test]
    fn options_merge_and_apply() {
        let base = ConnectionOptions::default()
            .max_reconnect_attempts(5)
            .debug(true);
        let merged = base.merge(ConnectionOptions::default().max_reconnect_attempts(2));
        let mut config = ConnectionConfig::new("ws://x");
        merged.apply_to(&mut config);
        assert_eq!(config.max_reconnect_attempts, 2);
        assert!(config.debug);
        assert!(config.auto_reconnect);
    }

    #[test]
    fn state_helpers() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Reconnecting.is_connecting());
        assert!(!ConnectionState::Error.is_connecting());
        assert_eq!(ConnectionState::Reconnecting.to_string(), "reconnecting");
    }
}
