//! Reactive store for pickups, workers, notifications and connection status.
//!
//! The store is the single source of truth for consumers: connections write
//! into it, consumers read snapshots or subscribe to a selected slice.

mod state;
mod subscription;

use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use pickup_live_shared::{
    endpoints, generate_id, InboundMessage, NewNotification, PickupUpdate, RealtimeError, Role,
    SystemNotification, WorkerUpdate,
};

pub use state::StoreState;
pub use subscription::SubscriptionId;

use subscription::{drain, Delivery, Subscriptions};

use crate::audio::AudioCue;
use crate::lock;
use crate::ws::{
    Connection, ConnectionEvent, ConnectionInfo, ConnectionRegistry, ConnectionState, ListenerId,
};

#[cfg(test)]
pub(crate) use state::fixtures;

/// Store behaviour knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    /// Initial sound preference.
    pub sound_enabled: bool,
    pub notification_capacity: usize,
    /// How long transient notifications stay; `None` keeps them.
    pub transient_ttl: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sound_enabled: true,
            notification_capacity: 50,
            transient_ttl: Some(Duration::from_millis(3_000)),
        }
    }
}

/// Reactive domain store fed by the connections of a [`ConnectionRegistry`].
///
/// Cloning is cheap; clones share the same state.
#[derive(Clone)]
pub struct RealtimeStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    registry: Arc<ConnectionRegistry>,
    config: StoreConfig,
    audio: Arc<dyn AudioCue>,
    state: Mutex<Arc<StoreState>>,
    subscriptions: Mutex<Subscriptions>,
    delivery: Mutex<Delivery>,
    /// Connections this store listens to, by endpoint.
    wired: Mutex<HashMap<String, (Connection, ListenerId)>>,
}

impl RealtimeStore {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        config: StoreConfig,
        audio: Arc<dyn AudioCue>,
    ) -> Self {
        let state = StoreState::new(config.sound_enabled);
        Self {
            inner: Arc::new(StoreInner {
                registry,
                config,
                audio,
                state: Mutex::new(Arc::new(state)),
                subscriptions: Mutex::new(Subscriptions::default()),
                delivery: Mutex::new(Delivery::default()),
                wired: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    /// Current state. Cheap: the snapshot is shared until the next mutation.
    pub fn snapshot(&self) -> Arc<StoreState> {
        lock(&self.inner.state).clone()
    }

    // --- Session ---

    /// Start the session's connections for `role` and route their events
    /// into the store. Returns the connections that were opened.
    ///
    /// Everyone gets the general pickup feed; customers add their customer
    /// channel, workers their worker channel and admins both.
    pub fn initialize_connections(
        &self,
        token: &str,
        user_id: impl Display,
        role: Role,
    ) -> Vec<Connection> {
        self.inner.registry.set_token(token);

        let mut paths = vec![endpoints::pickup(None)];
        if role.watches_customer_channel() {
            paths.push(endpoints::customer(&user_id));
        }
        if role.watches_worker_channel() {
            paths.push(endpoints::worker(&user_id));
        }

        let connections: Vec<Connection> = paths
            .iter()
            .map(|path| {
                let connection = self.inner.registry.get_connection(path, None);
                self.wire(&connection);
                connection
            })
            .collect();

        crate::log_info!(
            "Initializing {} connection(s) for {} {}",
            connections.len(),
            role,
            user_id
        );
        for connection in &connections {
            connection.connect();
        }
        connections
    }

    /// Route a connection's events into the store. Wiring the same
    /// connection twice is a no-op.
    pub fn wire(&self, connection: &Connection) {
        let endpoint = connection.endpoint().to_string();
        {
            let mut wired = lock(&self.inner.wired);
            if let Some((existing, listener)) = wired.get(&endpoint) {
                if existing.ptr_eq(connection) {
                    return;
                }
                existing.off(*listener);
            }

            let store = Arc::downgrade(&self.inner);
            let weak = connection.downgrade();
            let listener = connection.on(move |event| {
                let (Some(inner), Some(connection)) = (store.upgrade(), weak.upgrade()) else {
                    return;
                };
                RealtimeStore { inner }.handle_event(&connection, event);
            });
            wired.insert(endpoint, (connection.clone(), listener));
        }
        self.publish(connection.info());
    }

    fn handle_event(&self, connection: &Connection, event: &ConnectionEvent) {
        let endpoint = connection.endpoint();
        match event {
            ConnectionEvent::Connecting => {
                self.publish_state(connection, ConnectionState::Connecting);
            }
            ConnectionEvent::Connected => {
                self.publish_state(connection, ConnectionState::Connected);
                self.add_transient_notification(NewNotification::success(
                    "Connected",
                    format!("Live updates active on {}", endpoint),
                ));
            }
            ConnectionEvent::Disconnected { code, .. } => {
                self.publish_state(connection, ConnectionState::Disconnected);
                self.add_notification(NewNotification::warning(
                    "Disconnected",
                    format!("{} closed (code {})", endpoint, code),
                ));
            }
            ConnectionEvent::Reconnecting { attempt, .. } => {
                self.publish_state(connection, ConnectionState::Reconnecting);
                if *attempt == 1 {
                    self.add_notification(NewNotification::info(
                        "Reconnecting",
                        format!("Trying to restore {}", endpoint),
                    ));
                }
            }
            ConnectionEvent::Error(error) => {
                let mut info = connection.info();
                info.state = ConnectionState::Error;
                info.last_error = Some(error.to_string());
                self.publish(info);
                self.add_notification(NewNotification::error(
                    "Connection error",
                    error.to_string(),
                ));
            }
            ConnectionEvent::ReconnectFailed { attempts } => {
                self.publish_state(connection, ConnectionState::Disconnected);
                self.add_notification(NewNotification::error(
                    "Connection lost",
                    format!(
                        "{}: {}",
                        endpoint,
                        RealtimeError::ReconnectExhausted {
                            attempts: *attempts
                        }
                    ),
                ));
            }
            ConnectionEvent::Inbound(message) => self.ingest(message),
            _ => {}
        }
    }

    /// Apply a decoded inbound message. Chat-room types are left to adapters.
    pub fn ingest(&self, message: &InboundMessage) {
        match message {
            InboundMessage::PickupUpdate(update) => self.update_pickup(update.clone()),
            InboundMessage::WorkerUpdate(update) => self.update_worker(update.clone()),
            InboundMessage::Notification(notification) => {
                self.add_notification(notification.clone());
            }
            _ => {}
        }
    }

    fn publish_state(&self, connection: &Connection, state: ConnectionState) {
        let mut info = connection.info();
        info.state = state;
        self.publish(info);
    }

    fn publish(&self, info: ConnectionInfo) {
        self.update(|state| state.set_connection(info));
    }

    // --- Entities ---

    /// Insert or replace the pickup with `update.id`; the last update to
    /// arrive wins.
    pub fn update_pickup(&self, update: PickupUpdate) {
        let sound = self.update(|state| {
            state.upsert_pickup(update);
            state.sound_enabled
        });
        if sound {
            self.inner.audio.play();
        }
    }

    pub fn update_worker(&self, update: WorkerUpdate) {
        self.update(|state| state.upsert_worker(update));
    }

    // --- Notifications ---

    /// Add a notification at the front of the feed. Returns its id.
    pub fn add_notification(&self, notification: NewNotification) -> String {
        let entry = SystemNotification {
            id: generate_id("notif"),
            kind: notification.kind,
            title: notification.title,
            message: notification.message,
            timestamp: Utc::now(),
            read: false,
        };
        let id = entry.id.clone();
        let capacity = self.inner.config.notification_capacity;
        self.update(|state| state.push_notification(entry, capacity));
        id
    }

    /// Like [`add_notification`](Self::add_notification), but dismissed
    /// again after the configured TTL.
    pub fn add_transient_notification(&self, notification: NewNotification) -> String {
        let id = self.add_notification(notification);
        let Some(ttl) = self.inner.config.transient_ttl else {
            return id;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let store = Arc::downgrade(&self.inner);
                let dismiss_id = id.clone();
                runtime.spawn(dismiss_after(store, dismiss_id, ttl));
            }
            Err(_) => {
                crate::log_debug!("No runtime to expire notification {}", id);
            }
        }
        id
    }

    pub fn mark_notification_read(&self, id: &str) -> bool {
        self.update(|state| state.mark_read(id))
    }

    pub fn dismiss_notification(&self, id: &str) -> bool {
        self.update(|state| state.dismiss(id))
    }

    pub fn clear_notifications(&self) {
        self.update(|state| state.notifications.clear());
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        self.update(|state| state.sound_enabled = enabled);
    }

    // --- Subscriptions ---

    /// Call `on_change` with the new value whenever `select` yields something
    /// different after a mutation.
    pub fn subscribe<T, S, F>(&self, select: S, on_change: F) -> SubscriptionId
    where
        T: PartialEq + Clone + Send + 'static,
        S: Fn(&StoreState) -> T + Send + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut subscriptions = lock(&self.inner.subscriptions);
        let snapshot = self.snapshot();
        subscriptions.add(&snapshot, select, on_change)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        lock(&self.inner.subscriptions).remove(id)
    }

    // --- Teardown ---

    /// Disconnect every connection and reset the store. The sound
    /// preference is kept.
    pub fn disconnect_all(&self) {
        let wired: Vec<(Connection, ListenerId)> =
            lock(&self.inner.wired).drain().map(|(_, entry)| entry).collect();
        for (connection, listener) in wired {
            connection.off(listener);
        }
        self.inner.registry.disconnect_all();
        self.update(StoreState::reset);
        crate::log_info!("Store reset");
    }

    // --- Internals ---

    fn update<R>(&self, mutate: impl FnOnce(&mut StoreState) -> R) -> R {
        let result = {
            let mut current = lock(&self.inner.state);
            mutate(Arc::make_mut(&mut current))
        };
        self.notify();
        result
    }

    fn notify(&self) {
        // Queue under the subscriptions lock so delivery order follows poll order.
        let must_drain = {
            let mut subscriptions = lock(&self.inner.subscriptions);
            let snapshot = self.snapshot();
            let pending = subscriptions.poll(&snapshot);
            lock(&self.inner.delivery).enqueue(pending)
        };
        if must_drain {
            drain(&self.inner.delivery);
        }
    }
}

async fn dismiss_after(store: Weak<StoreInner>, id: String, ttl: Duration) {
    tokio::time::sleep(ttl).await;
    if let Some(inner) = store.upgrade() {
        RealtimeStore { inner }.dismiss_notification(&id);
    }
}

impl std::fmt::Debug for RealtimeStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeStore")
            .field("state", &self.snapshot())
            .finish()
    }
}
