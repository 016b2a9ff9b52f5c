//! Store state and the pure operations on it.

use std::collections::{BTreeMap, VecDeque};

use pickup_live_shared::{PickupUpdate, SystemNotification, WorkerUpdate};

use crate::ws::ConnectionInfo;

/// Everything the store knows. Readers get it as an immutable `Arc` snapshot.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreState {
    /// Latest update per pickup id.
    pub pickups: BTreeMap<u64, PickupUpdate>,
    /// Latest update per worker id.
    pub workers: BTreeMap<u64, WorkerUpdate>,
    /// Newest first.
    pub notifications: VecDeque<SystemNotification>,
    /// Latest published info per endpoint.
    pub connections: BTreeMap<String, ConnectionInfo>,
    /// True iff at least one endpoint is connected.
    pub global_connected: bool,
    pub sound_enabled: bool,
}

impl StoreState {
    pub(crate) fn new(sound_enabled: bool) -> Self {
        Self {
            sound_enabled,
            ..Self::default()
        }
    }

    // --- Derived views ---

    /// Pickups that are neither completed nor cancelled.
    pub fn active_pickups(&self) -> impl Iterator<Item = &PickupUpdate> {
        self.pickups.values().filter(|p| !p.status.is_terminal())
    }

    /// Workers that are online or busy.
    pub fn online_workers(&self) -> impl Iterator<Item = &WorkerUpdate> {
        self.workers.values().filter(|w| w.status.is_present())
    }

    pub fn unread_notifications(&self) -> impl Iterator<Item = &SystemNotification> {
        self.notifications.iter().filter(|n| !n.read)
    }

    pub fn unread_count(&self) -> usize {
        self.unread_notifications().count()
    }

    pub fn pickup(&self, id: u64) -> Option<&PickupUpdate> {
        self.pickups.get(&id)
    }

    pub fn worker(&self, id: u64) -> Option<&WorkerUpdate> {
        self.workers.get(&id)
    }

    pub fn connection(&self, endpoint: &str) -> Option<&ConnectionInfo> {
        self.connections.get(endpoint)
    }

    // --- Mutations ---

    pub(crate) fn upsert_pickup(&mut self, update: PickupUpdate) {
        self.pickups.insert(update.id, update);
    }

    pub(crate) fn upsert_worker(&mut self, update: WorkerUpdate) {
        self.workers.insert(update.id, update);
    }

    /// Prepend and keep at most `capacity` entries, dropping the oldest.
    pub(crate) fn push_notification(&mut self, notification: SystemNotification, capacity: usize) {
        self.notifications.push_front(notification);
        self.notifications.truncate(capacity);
    }

    pub(crate) fn mark_read(&mut self, id: &str) -> bool {
        match self.notifications.iter_mut().find(|n| n.id == id) {
            Some(n) if !n.read => {
                n.read = true;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn dismiss(&mut self, id: &str) -> bool {
        let before = self.notifications.len();
        self.notifications.retain(|n| n.id != id);
        self.notifications.len() != before
    }

    pub(crate) fn set_connection(&mut self, info: ConnectionInfo) {
        self.connections.insert(info.endpoint.clone(), info);
        self.global_connected = self.connections.values().any(|c| c.state.is_connected());
    }

    /// Back to empty, keeping the sound preference.
    pub(crate) fn reset(&mut self) {
        *self = Self::new(self.sound_enabled);
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::ws::ConnectionState;
    use pickup_live_shared::{PickupStatus, WorkerStatus};

    #[test]
    fn upsert_replaces_by_id() {
        let mut state = StoreState::default();
        state.upsert_pickup(pickup(7, PickupStatus::Accepted));
        state.upsert_pickup(pickup(7, PickupStatus::Completed));
        assert_eq!(state.pickups.len(), 1);
        assert_eq!(state.pickup(7).unwrap().status, PickupStatus::Completed);
        assert_eq!(state.active_pickups().count(), 0);
    }

    #[test]
    fn derived_views_filter_by_status() {
        let mut state = StoreState::default();
        state.upsert_pickup(pickup(1, PickupStatus::Pending));
        state.upsert_pickup(pickup(2, PickupStatus::Cancelled));
        state.upsert_pickup(pickup(3, PickupStatus::EnRoute));
        state.upsert_worker(worker(1, WorkerStatus::Online));
        state.upsert_worker(worker(2, WorkerStatus::Busy));
        state.upsert_worker(worker(3, WorkerStatus::Offline));

        let active: Vec<u64> = state.active_pickups().map(|p| p.id).collect();
        assert_eq!(active, vec![1, 3]);
        let online: Vec<u64> = state.online_workers().map(|w| w.id).collect();
        assert_eq!(online, vec![1, 2]);
    }

    #[test]
    fn notifications_are_bounded_newest_first() {
        let mut state = StoreState::default();
        for i in 0..51 {
            state.push_notification(notification(&format!("n{}", i)), 50);
        }
        assert_eq!(state.notifications.len(), 50);
        assert_eq!(state.notifications.front().unwrap().id, "n50");
        assert_eq!(state.notifications.back().unwrap().id, "n1");
        assert!(state.notifications.iter().all(|n| n.id != "n0"));
    }

    #[test]
    fn read_and_dismiss() {
        let mut state = StoreState::default();
        state.push_notification(notification("a"), 50);
        state.push_notification(notification("b"), 50);
        assert!(state.mark_read("a"));
        assert!(!state.mark_read("a"));
        assert!(!state.mark_read("missing"));
        assert_eq!(state.unread_count(), 1);
        assert!(state.dismiss("b"));
        assert!(!state.dismiss("b"));
        assert_eq!(state.notifications.len(), 1);
    }

    #[test]
    fn global_connected_tracks_any_connection() {
        let mut state = StoreState::default();
        state.set_connection(info("/a/", ConnectionState::Connected));
        state.set_connection(info("/b/", ConnectionState::Reconnecting));
        state.set_connection(info("/c/", ConnectionState::Connected));
        assert!(state.global_connected);

        state.set_connection(info("/a/", ConnectionState::Disconnected));
        assert!(state.global_connected);
        state.set_connection(info("/c/", ConnectionState::Error));
        assert!(!state.global_connected);
    }

    #[test]
    fn reset_keeps_sound_preference() {
        let mut state = StoreState::new(false);
        state.upsert_pickup(pickup(1, PickupStatus::Pending));
        state.push_notification(notification("x"), 50);
        state.set_connection(info("/a/", ConnectionState::Connected));
        state.reset();
        assert_eq!(state, StoreState::new(false));
    }
}
