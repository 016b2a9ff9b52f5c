//! Live tracking of a single pickup over `/ws/pickup/{id}/`.

use std::sync::{Arc, Mutex};

use pickup_live_shared::{endpoints, message_types, InboundMessage, PickupUpdate};
use serde::Serialize;

use crate::lock;
use crate::stores::{RealtimeStore, SubscriptionId};
use crate::ws::{Connection, ConnectionEvent, ConnectionRegistry, ListenerId};

#[derive(Serialize)]
struct SubscribeIntent {
    pickup_id: u64,
}

/// Feeds one pickup's channel into the store.
///
/// Each time the socket (re)connects a `subscribe_pickup` intent is sent.
/// Dropping the tracker detaches it; [`stop`](Self::stop) also closes the socket.
pub struct PickupTracker {
    pickup_id: u64,
    registry: Arc<ConnectionRegistry>,
    store: RealtimeStore,
    connection: Connection,
    listener: ListenerId,
    watches: Mutex<Vec<SubscriptionId>>,
}

impl PickupTracker {
    pub fn track(registry: &Arc<ConnectionRegistry>, store: &RealtimeStore, pickup_id: u64) -> Self {
        let connection = registry.get_connection(&endpoints::pickup(Some(pickup_id)), None);

        let sink = store.clone();
        let weak = connection.downgrade();
        let listener = connection.on(move |event| match event {
            ConnectionEvent::Connected => {
                if let Some(connection) = weak.upgrade() {
                    subscribe(&connection, pickup_id);
                }
            }
            ConnectionEvent::Inbound(InboundMessage::PickupUpdate(update)) => {
                sink.update_pickup(update.clone());
            }
            _ => {}
        });

        if connection.is_connected() {
            subscribe(&connection, pickup_id);
        } else {
            connection.connect();
        }
        crate::log_info!("Tracking pickup {}", pickup_id);

        Self {
            pickup_id,
            registry: registry.clone(),
            store: store.clone(),
            connection,
            listener,
            watches: Mutex::new(Vec::new()),
        }
    }

    pub fn pickup_id(&self) -> u64 {
        self.pickup_id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// The store's latest view of this pickup.
    pub fn current(&self) -> Option<PickupUpdate> {
        self.store.snapshot().pickup(self.pickup_id).cloned()
    }

    /// Call `on_change` whenever this pickup's entry in the store changes.
    pub fn watch<F>(&self, on_change: F) -> SubscriptionId
    where
        F: Fn(&Option<PickupUpdate>) + Send + Sync + 'static,
    {
        let pickup_id = self.pickup_id;
        let id = self
            .store
            .subscribe(move |state| state.pickup(pickup_id).cloned(), on_change);
        lock(&self.watches).push(id);
        id
    }

    /// Stop tracking and close the pickup's socket.
    pub fn stop(self) {
        self.registry.disconnect(self.connection.endpoint());
        crate::log_info!("Stopped tracking pickup {}", self.pickup_id);
    }
}

fn subscribe(connection: &Connection, pickup_id: u64) -> bool {
    connection.send_json(message_types::SUBSCRIBE_PICKUP, &SubscribeIntent { pickup_id })
}

impl Drop for PickupTracker {
    fn drop(&mut self) {
        self.connection.off(self.listener);
        for id in lock(&self.watches).drain(..) {
            self.store.unsubscribe(id);
        }
    }
}
