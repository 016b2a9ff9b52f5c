//! The `Connection` handle and its lifecycle tasks.
//!
//! Each connection owns at most one live socket session, one heartbeat task
//! and one reconnect timer. All three carry the generation they were started
//! under; bumping the generation (connect, reconnect, disconnect) turns any
//! task still in flight into a no-op.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::Utc;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use pickup_live_shared::{Envelope, InboundMessage, RealtimeError, CLOSE_ABNORMAL, CLOSE_NORMAL};
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{
    ConnectionConfig, ConnectionEvent, ConnectionInfo, ConnectionState, ConnectionStats,
    Connector, OutboundFrame, Transport, TransportEvent,
};
use crate::lock;
use crate::ws::backoff::reconnect_delay;

/// Handle returned by [`Connection::on`], used to remove the listener again.
pub type ListenerId = u64;

type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// One managed WebSocket endpoint.
///
/// Cloning is cheap and every clone drives the same socket. The public
/// methods never block on I/O: they update state, spawn or cancel tasks on
/// the current Tokio runtime and return.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

/// Non-owning reference to a [`Connection`], for hooks registered on the
/// connection itself.
#[derive(Clone)]
pub struct WeakConnection {
    inner: Weak<Inner>,
}

impl WeakConnection {
    pub fn upgrade(&self) -> Option<Connection> {
        self.inner.upgrade().map(|inner| Connection { inner })
    }
}

struct Inner {
    endpoint: String,
    connector: Arc<dyn Connector>,
    shared: Mutex<Shared>,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
}

struct Shared {
    config: ConnectionConfig,
    state: ConnectionState,
    stats: ConnectionStats,
    reconnect_attempts: u32,
    generation: u64,
    outbound: Option<UnboundedSender<OutboundFrame>>,
    session: Option<JoinHandle<()>>,
    reconnect_timer: Option<JoinHandle<()>>,
    heartbeat: Option<JoinHandle<()>>,
    /// Set once `ReconnectFailed` has been emitted for the current run of failures.
    gave_up: bool,
    /// Set by a manual `disconnect()`; never cleared.
    retired: bool,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    fn cancel_reconnect(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn stop_heartbeat(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
    }

    /// Close the live socket, if any, with `code`.
    fn close_transport(&mut self, code: u16, reason: &str) {
        self.stop_heartbeat();
        if let Some(outbound) = self.outbound.take() {
            let _ = outbound.unbounded_send(OutboundFrame::Close {
                code,
                reason: reason.to_string(),
            });
        }
        if let Some(session) = self.session.take() {
            session.abort();
        }
    }
}

impl Connection {
    pub fn new(
        endpoint: impl Into<String>,
        config: ConnectionConfig,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                endpoint: endpoint.into(),
                connector,
                shared: Mutex::new(Shared {
                    config,
                    state: ConnectionState::Disconnected,
                    stats: ConnectionStats::default(),
                    reconnect_attempts: 0,
                    generation: 0,
                    outbound: None,
                    session: None,
                    reconnect_timer: None,
                    heartbeat: None,
                    gave_up: false,
                    retired: false,
                }),
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn config(&self) -> ConnectionConfig {
        lock(&self.inner.shared).config.clone()
    }

    pub fn state(&self) -> ConnectionState {
        lock(&self.inner.shared).state
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Snapshot of the counters, with `uptime` measured now.
    pub fn stats(&self) -> ConnectionStats {
        let shared = lock(&self.inner.shared);
        let mut stats = shared.stats.clone();
        stats.uptime = match (shared.state, stats.connect_time) {
            (ConnectionState::Connected, Some(since)) => {
                (Utc::now() - since).to_std().unwrap_or_default()
            }
            _ => Duration::ZERO,
        };
        stats
    }

    pub fn info(&self) -> ConnectionInfo {
        let stats = self.stats();
        ConnectionInfo {
            endpoint: self.inner.endpoint.clone(),
            state: self.state(),
            last_error: stats.last_error.clone(),
            stats,
        }
    }

    /// Number of heartbeat and reconnect timers still scheduled.
    pub fn pending_timers(&self) -> usize {
        let shared = lock(&self.inner.shared);
        [&shared.reconnect_timer, &shared.heartbeat]
            .into_iter()
            .filter(|slot| matches!(slot, Some(task) if !task.is_finished()))
            .count()
    }

    /// Whether [`disconnect`](Self::disconnect) was called. A retired
    /// connection no longer reconnects on its own and the registry replaces it.
    pub fn is_retired(&self) -> bool {
        lock(&self.inner.shared).retired
    }

    /// Whether both handles drive the same connection.
    pub fn ptr_eq(&self, other: &Connection) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn downgrade(&self) -> WeakConnection {
        WeakConnection {
            inner: Arc::downgrade(&self.inner),
        }
    }

    // --- Listeners ---

    /// Register a listener for every event of this connection.
    ///
    /// Listeners run on whichever task produced the event, after the
    /// connection's internal lock has been released, so they may call back
    /// into the connection.
    pub fn on<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id();
        self.inner.add_listener(id, Arc::new(listener));
        id
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.remove_listener(id)
    }

    /// Stream of every event from now on. The listener behind it is removed
    /// once the receiver is dropped and the next event is emitted.
    pub fn events(&self) -> UnboundedReceiver<ConnectionEvent> {
        let (tx, rx) = unbounded();
        let id = self.inner.next_listener_id();
        let weak = Arc::downgrade(&self.inner);
        self.inner.add_listener(
            id,
            Arc::new(move |event: &ConnectionEvent| {
                if tx.unbounded_send(event.clone()).is_err() {
                    if let Some(inner) = weak.upgrade() {
                        inner.remove_listener(id);
                    }
                }
            }),
        );
        rx
    }

    // --- Lifecycle ---

    /// Open the socket. A no-op while connecting or connected.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the socket for good: disables auto-reconnect and cancels every timer.
    pub fn disconnect(&self) {
        let previous = {
            let mut shared = lock(&self.inner.shared);
            shared.config.auto_reconnect = false;
            shared.retired = true;
            shared.cancel_reconnect();
            shared.close_transport(CLOSE_NORMAL, "manual");
            shared.generation += 1;
            std::mem::replace(&mut shared.state, ConnectionState::Disconnected)
        };

        if previous != ConnectionState::Disconnected {
            crate::log_info!("Disconnected from {}", self.inner.endpoint);
            self.inner.emit(ConnectionEvent::Disconnected {
                code: CLOSE_NORMAL,
                reason: "manual".to_string(),
            });
        }
    }

    /// Drop the current socket and open a fresh one, keeping auto-reconnect.
    pub fn reconnect(&self) {
        {
            let mut shared = lock(&self.inner.shared);
            shared.cancel_reconnect();
            shared.close_transport(CLOSE_NORMAL, "reconnect");
            shared.generation += 1;
            shared.reconnect_attempts = 0;
            shared.gave_up = false;
            shared.state = ConnectionState::Disconnected;
        }
        crate::log_info!("Reconnecting {} on request", self.inner.endpoint);
        self.inner.connect();
    }

    /// Store a new token; a live socket is reopened so it authenticates with it.
    pub fn update_token(&self, token: impl Into<String>) {
        let connected = {
            let mut shared = lock(&self.inner.shared);
            shared.config.token = Some(token.into());
            shared.state.is_connected()
        };
        if connected {
            self.reconnect();
        }
    }

    // --- Sending ---

    /// Send a message of type `kind`. Returns `false` (and emits
    /// [`ConnectionEvent::SendError`]) unless the connection is open.
    pub fn send(&self, kind: &str, data: Option<Value>) -> bool {
        self.inner.send_envelope(Envelope::outgoing(kind, data))
    }

    pub fn send_json<T: Serialize>(&self, kind: &str, payload: &T) -> bool {
        match serde_json::to_value(payload) {
            Ok(data) => self.send(kind, Some(data)),
            Err(err) => {
                self.inner.emit(ConnectionEvent::SendError {
                    kind: kind.to_string(),
                    error: err.into(),
                });
                false
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

impl Inner {
    fn next_listener_id(&self) -> ListenerId {
        self.next_listener.fetch_add(1, Ordering::Relaxed)
    }

    fn add_listener(&self, id: ListenerId, listener: Listener) {
        lock(&self.listeners).push((id, listener));
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    fn emit(&self, event: ConnectionEvent) {
        let listeners: Vec<Listener> = lock(&self.listeners)
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in listeners {
            listener(&event);
        }
    }

    fn connect(self: &Arc<Self>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                let error = RealtimeError::connection("connect() called outside a Tokio runtime");
                {
                    let mut shared = lock(&self.shared);
                    shared.state = ConnectionState::Error;
                    shared.stats.last_error = Some(error.to_string());
                }
                crate::log_error!("Cannot connect {}: {}", self.endpoint, error);
                self.emit(ConnectionEvent::Error(error));
                return;
            }
        };

        let generation = {
            let mut shared = lock(&self.shared);
            if matches!(
                shared.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return;
            }
            // A fresh connect after giving up starts a new run of retries.
            if shared.gave_up {
                shared.reconnect_attempts = 0;
                shared.gave_up = false;
            }
            shared.cancel_reconnect();
            shared.close_transport(CLOSE_NORMAL, "superseded");
            shared.generation += 1;
            shared.state = ConnectionState::Connecting;
            shared.generation
        };

        crate::log_info!("Connecting to {}", self.endpoint);
        self.emit(ConnectionEvent::Connecting);

        // A listener may have disconnected us while `Connecting` was delivered.
        let mut shared = lock(&self.shared);
        if shared.is_current(generation) && shared.state == ConnectionState::Connecting {
            let url = shared.config.socket_url();
            shared.session = Some(runtime.spawn(run_session(
                Arc::downgrade(self),
                generation,
                url,
            )));
        }
    }

    fn handle_open(self: &Arc<Self>, generation: u64, outbound: UnboundedSender<OutboundFrame>) -> bool {
        {
            let mut shared = lock(&self.shared);
            if !shared.is_current(generation) {
                return false;
            }
            shared.state = ConnectionState::Connected;
            shared.outbound = Some(outbound);
            shared.reconnect_attempts = 0;
            shared.gave_up = false;
            shared.stats.connect_time = Some(Utc::now());

            let period = shared.config.heartbeat_interval;
            if !period.is_zero() {
                shared.heartbeat = Some(tokio::spawn(run_heartbeat(
                    Arc::downgrade(self),
                    generation,
                    period,
                )));
            }
        }

        crate::log_info!("Connected to {}", self.endpoint);
        self.emit(ConnectionEvent::Connected);
        true
    }

    fn handle_text(&self, generation: u64, text: &str) {
        let (debug, parsed) = {
            let mut shared = lock(&self.shared);
            if !shared.is_current(generation) {
                return;
            }
            let parsed = Envelope::parse(text);
            match parsed {
                Ok(_) => shared.stats.messages_received += 1,
                Err(_) => shared.stats.parse_errors += 1,
            }
            (shared.config.debug, parsed)
        };

        let envelope = match parsed {
            Ok(envelope) => envelope,
            Err(error) => {
                crate::log_warn!("Dropping malformed frame on {}: {}", self.endpoint, error);
                self.emit(ConnectionEvent::ParseError {
                    raw: text.to_string(),
                    error,
                });
                return;
            }
        };

        if debug {
            crate::log_debug!("{} <- {}", self.endpoint, text);
        }

        let typed = InboundMessage::decode(&envelope);
        self.emit(ConnectionEvent::Message(envelope));
        match typed {
            Ok(message) => self.emit(ConnectionEvent::Inbound(message)),
            Err(error) => {
                lock(&self.shared).stats.parse_errors += 1;
                crate::log_warn!("Undecodable payload on {}: {}", self.endpoint, error);
                self.emit(ConnectionEvent::ParseError {
                    raw: text.to_string(),
                    error,
                });
            }
        }
    }

    /// Record a transport failure. Reconnection is left to the close that follows.
    fn handle_error(&self, generation: u64, error: RealtimeError) {
        {
            let mut shared = lock(&self.shared);
            if !shared.is_current(generation) {
                return;
            }
            shared.state = ConnectionState::Error;
            shared.stats.last_error = Some(error.to_string());
        }
        crate::log_error!("WebSocket error on {}: {}", self.endpoint, error);
        self.emit(ConnectionEvent::Error(error));
    }

    fn handle_close(self: &Arc<Self>, generation: u64, code: u16, reason: String) {
        let events = {
            let mut shared = lock(&self.shared);
            if !shared.is_current(generation) {
                return;
            }
            shared.stop_heartbeat();
            shared.outbound = None;
            shared.session = None;
            shared.state = ConnectionState::Disconnected;

            let mut events = vec![ConnectionEvent::Disconnected {
                code,
                reason: reason.clone(),
            }];
            if code != CLOSE_NORMAL && shared.config.auto_reconnect {
                events.extend(self.schedule_reconnect(&mut shared));
            }
            events
        };

        if code == CLOSE_NORMAL {
            crate::log_info!("{} closed normally", self.endpoint);
        } else {
            crate::log_warn!("{} closed with code {} ({})", self.endpoint, code, reason);
        }
        for event in events {
            self.emit(event);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, shared: &mut Shared) -> Option<ConnectionEvent> {
        if shared.reconnect_attempts >= shared.config.max_reconnect_attempts {
            if shared.gave_up {
                return None;
            }
            shared.gave_up = true;
            crate::log_error!(
                "Giving up on {} after {} reconnection attempts",
                self.endpoint,
                shared.reconnect_attempts
            );
            return Some(ConnectionEvent::ReconnectFailed {
                attempts: shared.reconnect_attempts,
            });
        }

        shared.reconnect_attempts += 1;
        shared.stats.reconnect_count += 1;
        let attempt = shared.reconnect_attempts;
        let delay = reconnect_delay(shared.config.reconnect_interval, attempt);
        shared.state = ConnectionState::Reconnecting;
        shared.cancel_reconnect();
        shared.reconnect_timer = Some(tokio::spawn(reconnect_after(
            Arc::downgrade(self),
            shared.generation,
            delay,
        )));

        crate::log_info!(
            "Reconnecting to {} in {:?} (attempt {}/{})",
            self.endpoint,
            delay,
            attempt,
            shared.config.max_reconnect_attempts
        );
        Some(ConnectionEvent::Reconnecting { attempt, delay })
    }

    fn send_envelope(&self, envelope: Envelope) -> bool {
        let outcome = {
            let mut guard = lock(&self.shared);
            let shared = &mut *guard;
            match (&shared.outbound, shared.state) {
                (Some(outbound), ConnectionState::Connected) => envelope
                    .to_json()
                    .and_then(|json| {
                        outbound
                            .unbounded_send(OutboundFrame::Text(json))
                            .map_err(|_| RealtimeError::connection("socket is no longer writable"))
                    })
                    .map(|()| {
                        shared.stats.messages_sent += 1;
                        shared.config.debug
                    }),
                (_, state) => Err(RealtimeError::SendRejected {
                    state: state.to_string(),
                }),
            }
        };

        match outcome {
            Ok(debug) => {
                if debug {
                    crate::log_debug!("{} -> {}", self.endpoint, envelope.kind);
                }
                self.emit(ConnectionEvent::MessageSent(envelope));
                true
            }
            Err(error) => {
                crate::log_warn!(
                    "Cannot send '{}' on {}: {}",
                    envelope.kind,
                    self.endpoint,
                    error
                );
                self.emit(ConnectionEvent::SendError {
                    kind: envelope.kind,
                    error,
                });
                false
            }
        }
    }

    /// `(generation still current, connected)`
    fn heartbeat_status(&self, generation: u64) -> (bool, bool) {
        let shared = lock(&self.shared);
        (shared.is_current(generation), shared.state.is_connected())
    }
}

/// Drive one socket from open to close.
async fn run_session(inner: Weak<Inner>, generation: u64, url: String) {
    let Some(connector) = inner.upgrade().map(|inner| inner.connector.clone()) else {
        return;
    };
    let opened = connector.connect(&url).await;

    let mut inbound = {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match opened {
            Ok(Transport { outbound, inbound }) => {
                if !inner.handle_open(generation, outbound.clone()) {
                    let _ = outbound.unbounded_send(OutboundFrame::Close {
                        code: CLOSE_NORMAL,
                        reason: "superseded".to_string(),
                    });
                    return;
                }
                inbound
            }
            Err(error) => {
                let reason = error.to_string();
                inner.handle_error(generation, error);
                inner.handle_close(generation, CLOSE_ABNORMAL, reason);
                return;
            }
        }
    };

    while let Some(event) = inbound.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match event {
            TransportEvent::Text(text) => inner.handle_text(generation, &text),
            TransportEvent::Error(message) => {
                inner.handle_error(generation, RealtimeError::Connection(message))
            }
            TransportEvent::Closed { code, reason } => {
                inner.handle_close(generation, code, reason);
                return;
            }
        }
    }

    if let Some(inner) = inner.upgrade() {
        inner.handle_close(
            generation,
            CLOSE_ABNORMAL,
            "socket dropped without a close frame".to_string(),
        );
    }
}

async fn run_heartbeat(inner: Weak<Inner>, generation: u64, period: Duration) {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        match inner.heartbeat_status(generation) {
            (false, _) => return,
            (true, true) => {
                inner.send_envelope(Envelope::heartbeat());
            }
            (true, false) => {}
        }
    }
}

async fn reconnect_after(inner: Weak<Inner>, generation: u64, delay: Duration) {
    tokio::time::sleep(delay).await;
    let Some(inner) = inner.upgrade() else {
        return;
    };
    {
        let mut shared = lock(&inner.shared);
        if !shared.is_current(generation) || shared.state != ConnectionState::Reconnecting {
            return;
        }
        shared.reconnect_timer = None;
    }
    inner.connect();
}
