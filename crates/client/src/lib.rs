//! Pickup Live client - real-time connection layer.
//!
//! This crate keeps a set of WebSocket channels to the pickup backend alive
//! (with heartbeat and exponential-backoff reconnect), multiplexes them behind
//! a shared-token registry and folds their messages into a reactive store.

use std::sync::{Mutex, MutexGuard, PoisonError};

pub mod logging;

pub mod adapters;
pub mod audio;
pub mod config;
pub mod stores;
pub mod ws;

pub use adapters::{ChatRoom, PickupTracker, RoomState};
pub use audio::{AudioCue, Silent, TerminalBell};
pub use config::RealtimeConfig;
pub use stores::{RealtimeStore, StoreConfig, StoreState, SubscriptionId};
pub use ws::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionInfo, ConnectionOptions,
    ConnectionRegistry, ConnectionState, ConnectionStats, Connector, RegistryConfig,
    TungsteniteConnector,
};

/// Lock a mutex, recovering the data if a listener panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
