//! Registry of WebSocket connections keyed by endpoint path.

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};

use pickup_live_shared::endpoints;

use super::connection::{
    Connection, ConnectionConfig, ConnectionEvent, ConnectionInfo, ConnectionOptions, Connector,
};
use crate::lock;

/// How the registry builds new connections.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Socket base URL, e.g. `wss://api.example.com`. Endpoint paths are appended.
    pub base_url: String,
    pub debug: bool,
    /// Applied to every connection before per-call overrides.
    pub defaults: ConnectionOptions,
}

impl RegistryConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            debug: false,
            defaults: ConnectionOptions::default(),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    token: Option<String>,
    connections: HashMap<String, Connection>,
}

/// Owns one [`Connection`] per endpoint and the token they share.
///
/// Construct one per session and share it behind an `Arc`.
pub struct ConnectionRegistry {
    config: RegistryConfig,
    connector: Arc<dyn Connector>,
    state: Arc<Mutex<RegistryState>>,
}

impl ConnectionRegistry {
    pub fn new(config: RegistryConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            state: Arc::new(Mutex::new(RegistryState::default())),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), endpoint)
    }

    /// The cached connection for `endpoint`, created on first use.
    ///
    /// `overrides` only apply when the connection is created. A connection
    /// that gives up reconnecting or is disconnected by hand is evicted, so
    /// the next call builds a new one.
    pub fn get_connection(&self, endpoint: &str, overrides: Option<ConnectionOptions>) -> Connection {
        let key = endpoints::normalize(endpoint);
        let mut state = lock(&self.state);
        if let Some(existing) = state.connections.get(&key) {
            if !existing.is_retired() {
                return existing.clone();
            }
            crate::log_debug!("Replacing retired connection for {}", key);
        }

        let mut config = ConnectionConfig::new(self.url_for(&key));
        config.token = state.token.clone();
        config.debug = self.config.debug;
        self.config.defaults.apply_to(&mut config);
        if let Some(overrides) = overrides {
            overrides.apply_to(&mut config);
        }

        let connection = Connection::new(key.clone(), config, self.connector.clone());
        self.register_eviction(&key, &connection);
        state.connections.insert(key.clone(), connection.clone());
        crate::log_debug!("Registered connection for {}", key);
        connection
    }

    fn register_eviction(&self, key: &str, connection: &Connection) {
        let registry = Arc::downgrade(&self.state);
        let weak = connection.downgrade();
        let key = key.to_string();
        connection.on(move |event| {
            if !matches!(
                event,
                ConnectionEvent::ReconnectFailed { .. } | ConnectionEvent::Disconnected { .. }
            ) {
                return;
            }
            let (Some(registry), Some(this)) = (registry.upgrade(), weak.upgrade()) else {
                return;
            };
            let reason = match event {
                ConnectionEvent::ReconnectFailed { .. } => "reconnection gave up",
                _ if this.is_retired() => "manual disconnect",
                _ => return,
            };
            let mut state = lock(&registry);
            let still_cached = state
                .connections
                .get(&key)
                .is_some_and(|cached| cached.ptr_eq(&this));
            if still_cached {
                state.connections.remove(&key);
                crate::log_info!("Evicted {} after {}", key, reason);
            }
        });
    }

    /// Look up a cached connection without creating one.
    pub fn connection(&self, endpoint: &str) -> Option<Connection> {
        lock(&self.state)
            .connections
            .get(&endpoints::normalize(endpoint))
            .cloned()
    }

    /// Set the shared token and push it to every cached connection.
    pub fn set_token(&self, token: impl Into<String>) {
        let token = token.into();
        let connections: Vec<Connection> = {
            let mut state = lock(&self.state);
            state.token = Some(token.clone());
            state.connections.values().cloned().collect()
        };
        for connection in connections {
            connection.update_token(token.clone());
        }
    }

    pub fn token(&self) -> Option<String> {
        lock(&self.state).token.clone()
    }

    // --- Role-aware constructors ---

    fn open(&self, endpoint: &str) -> Connection {
        let connection = self.get_connection(endpoint, None);
        connection.connect();
        connection
    }

    /// `/ws/pickup/{id}/`, or the general pickup feed.
    pub fn connect_pickup(&self, pickup_id: Option<u64>) -> Connection {
        self.open(&endpoints::pickup(pickup_id))
    }

    pub fn connect_worker(&self, worker_id: impl Display) -> Connection {
        self.open(&endpoints::worker(worker_id))
    }

    pub fn connect_customer(&self, customer_id: impl Display) -> Connection {
        self.open(&endpoints::customer(customer_id))
    }

    pub fn connect_chat(&self, room_id: impl Display) -> Connection {
        self.open(&endpoints::chat(room_id))
    }

    // --- Teardown ---

    /// Disconnect and forget one endpoint. Returns whether it was cached.
    pub fn disconnect(&self, endpoint: &str) -> bool {
        let removed = lock(&self.state)
            .connections
            .remove(&endpoints::normalize(endpoint));
        match removed {
            Some(connection) => {
                connection.disconnect();
                true
            }
            None => false,
        }
    }

    /// Disconnect and forget every connection. The token is kept.
    pub fn disconnect_all(&self) {
        let connections: Vec<Connection> = {
            let mut state = lock(&self.state);
            state.connections.drain().map(|(_, c)| c).collect()
        };
        if !connections.is_empty() {
            crate::log_info!("Disconnecting {} connection(s)", connections.len());
        }
        for connection in connections {
            connection.disconnect();
        }
    }

    /// End of the session: disconnect everything and forget the token.
    pub fn teardown(&self) {
        self.disconnect_all();
        lock(&self.state).token = None;
    }

    // --- Introspection ---

    /// Info for every cached connection, ordered by endpoint.
    pub fn connection_infos(&self) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> =
            self.connections().iter().map(Connection::info).collect();
        infos.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        infos
    }

    pub fn is_any_connected(&self) -> bool {
        self.connections().iter().any(Connection::is_connected)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, endpoint: &str) -> bool {
        lock(&self.state)
            .connections
            .contains_key(&endpoints::normalize(endpoint))
    }

    fn connections(&self) -> Vec<Connection> {
        lock(&self.state).connections.values().cloned().collect()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("base_url", &self.config.base_url)
            .field("connections", &self.len())
            .finish()
    }
}
