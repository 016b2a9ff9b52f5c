//! Selector subscriptions.
//!
//! A subscriber is a `(selector, on_change)` pair. After every store mutation
//! the selector is re-run against the new snapshot and `on_change` fires only
//! if the selected value differs from the last one seen.
//!
//! Callbacks are queued in the order their changes were observed and run
//! one at a time, outside the store's locks. A mutation made while another
//! thread is delivering only queues its callbacks; that thread runs them.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::state::StoreState;
use crate::lock;

/// Handle returned by `RealtimeStore::subscribe`.
pub type SubscriptionId = u64;

/// A notification that still has to be delivered, outside any store lock.
pub(crate) type Pending = Box<dyn FnOnce() + Send>;

trait Watch: Send {
    fn poll(&mut self, state: &StoreState) -> Option<Pending>;
}

struct Selector<T, S, F> {
    select: S,
    on_change: Arc<F>,
    last: T,
}

impl<T, S, F> Watch for Selector<T, S, F>
where
    T: PartialEq + Clone + Send + 'static,
    S: Fn(&StoreState) -> T + Send,
    F: Fn(&T) + Send + Sync + 'static,
{
    fn poll(&mut self, state: &StoreState) -> Option<Pending> {
        let next = (self.select)(state);
        if next == self.last {
            return None;
        }
        self.last = next.clone();
        let on_change = self.on_change.clone();
        Some(Box::new(move || on_change(&next)))
    }
}

#[derive(Default)]
pub(crate) struct Subscriptions {
    next_id: SubscriptionId,
    entries: Vec<(SubscriptionId, Box<dyn Watch>)>,
}

impl Subscriptions {
    /// Register a selector; `state` seeds the value later changes are compared with.
    pub fn add<T, S, F>(&mut self, state: &StoreState, select: S, on_change: F) -> SubscriptionId
    where
        T: PartialEq + Clone + Send + 'static,
        S: Fn(&StoreState) -> T + Send + 'static,
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.next_id += 1;
        let last = select(state);
        self.entries.push((
            self.next_id,
            Box::new(Selector {
                select,
                on_change: Arc::new(on_change),
                last,
            }),
        ));
        self.next_id
    }

    pub fn remove(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(existing, _)| *existing != id);
        self.entries.len() != before
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Re-run every selector and collect the callbacks that are due.
    pub fn poll(&mut self, state: &StoreState) -> Vec<Pending> {
        self.entries
            .iter_mut()
            .filter_map(|(_, watch)| watch.poll(state))
            .collect()
    }
}

/// Queue of callbacks waiting to run, and whether some thread is running them.
#[derive(Default)]
pub(crate) struct Delivery {
    queue: VecDeque<Pending>,
    draining: bool,
}

impl Delivery {
    /// Queue `pending`. Returns true if the caller must [`drain`] the queue.
    pub fn enqueue(&mut self, pending: Vec<Pending>) -> bool {
        self.queue.extend(pending);
        if self.draining || self.queue.is_empty() {
            return false;
        }
        self.draining = true;
        true
    }

    fn next(&mut self) -> Option<Pending> {
        let next = self.queue.pop_front();
        if next.is_none() {
            self.draining = false;
        }
        next
    }
}

/// Run queued callbacks until the queue is empty.
pub(crate) fn drain(delivery: &Mutex<Delivery>) {
    let _reset = ResetOnPanic(delivery);
    loop {
        let next = lock(delivery).next();
        let Some(run) = next else {
            return;
        };
        run();
    }
}

/// Hands the queue to the next caller if a callback panics mid-drain.
struct ResetOnPanic<'a>(&'a Mutex<Delivery>);

impl Drop for ResetOnPanic<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            lock(self.0).draining = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn fires_only_when_the_selected_value_changes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let mut subs = Subscriptions::default();
        let mut state = StoreState::new(true);
        subs.add(&state, |s| s.sound_enabled, move |v: &bool| {
            sink.lock().unwrap().push(*v)
        });

        state.global_connected = true;
        assert!(subs.poll(&state).is_empty());

        state.sound_enabled = false;
        for run in subs.poll(&state) {
            run();
        }
        assert!(subs.poll(&state).is_empty());
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[test]
    fn removed_subscriptions_stay_quiet() {
        let mut subs = Subscriptions::default();
        let mut state = StoreState::default();
        let id = subs.add(&state, |s| s.global_connected, |_: &bool| {});
        assert_eq!(subs.len(), 1);
        assert!(subs.remove(id));
        assert!(!subs.remove(id));
        state.global_connected = true;
        assert!(subs.poll(&state).is_empty());
    }

    #[test]
    fn callbacks_queued_during_a_drain_run_after_it() {
        let delivery = Arc::new(Mutex::new(Delivery::default()));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let (queue, sink) = (delivery.clone(), seen.clone());
        let first: Pending = Box::new(move || {
            let inner = sink.clone();
            let nested: Pending = Box::new(move || inner.lock().unwrap().push(2));
            assert!(!queue.lock().unwrap().enqueue(vec![nested]));
            sink.lock().unwrap().push(1);
        });

        assert!(delivery.lock().unwrap().enqueue(vec![first]));
        drain(&delivery);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
        assert!(!delivery.lock().unwrap().draining);
        assert!(!delivery.lock().unwrap().enqueue(Vec::new()));
    }
}
