//! WebSocket module for real-time pickup, worker and chat channels.
//!
//! This module provides:
//! - Connection management with heartbeat and exponential-backoff reconnect
//! - One shared-token registry for every endpoint of a session
//! - A transport seam so the state machine can run over any socket
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                ConnectionRegistry                   │
//! │   (one Connection per endpoint, shared token)       │
//! └─────────────────────────────────────────────────────┘
//!                         │
//!          ┌──────────────┼──────────────┐
//!          ▼              ▼              ▼
//!   ┌────────────┐ ┌────────────┐ ┌────────────┐
//!   │ Connection │ │ Connection │ │ Connection │
//!   │ (general)  │ │ (worker 5) │ │ (chat 12)  │
//!   └────────────┘ └────────────┘ └────────────┘
//!          │              │              │
//!          ▼              ▼              ▼
//!   ┌─────────────────────────┐   ┌────────────┐
//!   │     RealtimeStore       │   │  ChatRoom  │
//!   │ (pickups, workers, ...) │   │  adapter   │
//!   └─────────────────────────┘   └────────────┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let registry = Arc::new(ConnectionRegistry::new(
//!     RegistryConfig::new("wss://api.example.com"),
//!     Arc::new(TungsteniteConnector),
//! ));
//! registry.set_token(token);
//! let general = registry.connect_pickup(None);
//! general.on(|event| println!("{:?}", event));
//! ```

mod backoff;
mod connection;
mod manager;

pub use backoff::{reconnect_delay, MAX_RECONNECT_DELAY};

// Re-export connection types
pub use connection::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionInfo, ConnectionOptions,
    ConnectionState, ConnectionStats, Connector, ListenerId, OutboundFrame, Transport,
    TransportEvent, TungsteniteConnector, WeakConnection,
};

// Re-export manager types
pub use manager::{ConnectionRegistry, RegistryConfig};

#[cfg(test)]
pub(crate) use connection::mock;
