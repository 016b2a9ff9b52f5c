//! In-memory connector and event helpers for tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_channel::mpsc::{unbounded, UnboundedReceiver, UnboundedSender};
use futures_util::StreamExt;
use pickup_live_shared::{Envelope, RealtimeError};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::{ConnectionEvent, Connector, OutboundFrame, Transport, TransportEvent};
use crate::lock;

const EVENT_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone)]
pub(crate) enum Outcome {
    Accept,
    Refuse(String),
    /// The open never completes.
    Hang,
}

/// The server side of one accepted mock socket.
pub(crate) struct MockSocket {
    pub url: String,
    to_client: UnboundedSender<TransportEvent>,
    from_client: UnboundedReceiver<OutboundFrame>,
}

impl MockSocket {
    pub fn push_text(&self, text: impl Into<String>) {
        let _ = self.to_client.unbounded_send(TransportEvent::Text(text.into()));
    }

    pub fn push_envelope(&self, kind: &str, data: Value) {
        let envelope = Envelope::outgoing(kind, Some(data));
        if let Ok(json) = envelope.to_json() {
            self.push_text(json);
        }
    }

    pub fn fail(&self, message: &str) {
        let _ = self
            .to_client
            .unbounded_send(TransportEvent::Error(message.to_string()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.unbounded_send(TransportEvent::Closed {
            code,
            reason: reason.to_string(),
        });
    }

    pub async fn next_frame(&mut self) -> Option<OutboundFrame> {
        tokio::time::timeout(EVENT_TIMEOUT, self.from_client.next())
            .await
            .ok()
            .flatten()
    }

    /// Next text frame written by the client, parsed as an envelope.
    pub async fn next_envelope(&mut self) -> Option<Envelope> {
        loop {
            match self.next_frame().await? {
                OutboundFrame::Text(text) => return Envelope::parse(&text).ok(),
                OutboundFrame::Close { .. } => continue,
            }
        }
    }

    pub fn try_frame(&mut self) -> Option<OutboundFrame> {
        self.from_client.try_next().ok().flatten()
    }
}

/// Scripted connector: pops an [`Outcome`] per attempt, falling back to a default.
pub(crate) struct MockConnector {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    attempts: Mutex<Vec<(String, Instant)>>,
    sockets: mpsc::UnboundedSender<MockSocket>,
}

impl MockConnector {
    fn with_fallback(fallback: Outcome) -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocket>) {
        let (sockets, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            attempts: Mutex::new(Vec::new()),
            sockets,
        });
        (connector, rx)
    }

    /// Accepts every attempt unless scripted otherwise. Keep the receiver
    /// alive: dropping a `MockSocket` drops the socket.
    pub fn accepting() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocket>) {
        Self::with_fallback(Outcome::Accept)
    }

    pub fn refusing() -> (Arc<Self>, mpsc::UnboundedReceiver<MockSocket>) {
        Self::with_fallback(Outcome::Refuse("connection refused".to_string()))
    }

    pub fn push_outcome(&self, outcome: Outcome) {
        lock(&self.script).push_back(outcome);
    }

    pub fn attempts(&self) -> usize {
        lock(&self.attempts).len()
    }

    pub fn attempt_urls(&self) -> Vec<String> {
        lock(&self.attempts).iter().map(|(url, _)| url.clone()).collect()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        lock(&self.attempts).iter().map(|(_, at)| *at).collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, url: &str) -> Result<Transport, RealtimeError> {
        lock(&self.attempts).push((url.to_string(), Instant::now()));
        let outcome = lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match outcome {
            Outcome::Refuse(reason) => Err(RealtimeError::connection(reason)),
            Outcome::Hang => std::future::pending().await,
            Outcome::Accept => {
                let (outbound, from_client) = unbounded();
                let (to_client, inbound) = unbounded();
                let _ = self.sockets.send(MockSocket {
                    url: url.to_string(),
                    to_client,
                    from_client,
                });
                Ok(Transport { outbound, inbound })
            }
        }
    }
}

pub(crate) async fn next_event(events: &mut UnboundedReceiver<ConnectionEvent>) -> ConnectionEvent {
    match tokio::time::timeout(EVENT_TIMEOUT, events.next()).await {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event stream ended"),
        Err(_) => panic!("timed out waiting for an event"),
    }
}

/// Skip events until one matches.
pub(crate) async fn wait_for<F>(
    events: &mut UnboundedReceiver<ConnectionEvent>,
    mut matches: F,
) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}
