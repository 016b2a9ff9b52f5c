//! End-to-end checks against a real WebSocket server on localhost.

use std::sync::Arc;
use std::time::Duration;

use futures_channel::mpsc::UnboundedReceiver;
use futures_util::{SinkExt, StreamExt};
use pickup_live_client::{
    ConnectionEvent, ConnectionOptions, ConnectionRegistry, ConnectionState, RealtimeStore,
    RegistryConfig, Silent, StoreConfig, TungsteniteConnector,
};
use pickup_live_shared::{Envelope, InboundMessage, PickupStatus};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

async fn wait_for<F>(events: &mut UnboundedReceiver<ConnectionEvent>, mut matches: F) -> ConnectionEvent
where
    F: FnMut(&ConnectionEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(event) = events.next().await {
            if matches(&event) {
                return event;
            }
        }
        panic!("event stream ended");
    })
    .await
    .expect("timed out waiting for event")
}

fn registry_for(addr: std::net::SocketAddr) -> Arc<ConnectionRegistry> {
    let mut config = RegistryConfig::new(format!("ws://{}", addr));
    config.defaults = ConnectionOptions::default().reconnect_interval(Duration::from_millis(50));
    Arc::new(ConnectionRegistry::new(config, Arc::new(TungsteniteConnector)))
}

#[tokio::test]
async fn messages_flow_both_ways_and_reach_the_store() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();

        let first = match ws.next().await.unwrap().unwrap() {
            Message::Text(text) => Envelope::parse(text.as_str()).unwrap(),
            other => panic!("expected text, got {:?}", other),
        };

        let update = json!({
            "type": "pickup_update",
            "data": {"id": 77, "status": "in_progress", "updated_at": "2024-05-01T10:00:00Z"}
        });
        ws.send(Message::Text(update.to_string().into())).await.unwrap();

        let mut close_code = None;
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Close(frame) = msg {
                close_code = frame.map(|f| u16::from(f.code));
                break;
            }
        }
        (first, close_code)
    });

    let registry = registry_for(addr);
    let store = RealtimeStore::new(
        registry.clone(),
        StoreConfig {
            transient_ttl: None,
            ..StoreConfig::default()
        },
        Arc::new(Silent),
    );
    registry.set_token("secret token");
    let connection = registry.get_connection("/ws/pickup/general/", None);
    store.wire(&connection);
    let mut events = connection.events();
    connection.connect();

    wait_for(&mut events, |e| *e == ConnectionEvent::Connected).await;
    assert!(store.snapshot().global_connected);
    assert!(connection.send("ping_test", Some(json!({"n": 1}))));

    wait_for(&mut events, |e| {
        matches!(e, ConnectionEvent::Inbound(InboundMessage::PickupUpdate(_)))
    })
    .await;
    assert_eq!(
        store.snapshot().pickup(77).map(|p| p.status),
        Some(PickupStatus::InProgress)
    );

    connection.disconnect();
    let (first, close_code) = tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.kind, "ping_test");
    assert!(first.id.starts_with("msg_"));
    assert_eq!(close_code, Some(1000));
    assert_eq!(connection.stats().messages_sent, 1);
    assert_eq!(connection.stats().messages_received, 1);
}

#[tokio::test]
async fn dropped_socket_is_reopened() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // First session is dropped without a close frame.
        let (stream, _) = listener.accept().await.unwrap();
        let ws = accept_async(stream).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if msg.is_close() {
                break;
            }
        }
    });

    let registry = registry_for(addr);
    let connection = registry.connect_pickup(None);
    let mut events = connection.events();

    wait_for(&mut events, |e| *e == ConnectionEvent::Connected).await;
    let reconnecting = wait_for(&mut events, |e| {
        matches!(e, ConnectionEvent::Reconnecting { .. })
    })
    .await;
    assert_eq!(
        reconnecting,
        ConnectionEvent::Reconnecting {
            attempt: 1,
            delay: Duration::from_millis(50)
        }
    );
    wait_for(&mut events, |e| *e == ConnectionEvent::Connected).await;
    assert_eq!(connection.state(), ConnectionState::Connected);
    assert_eq!(connection.stats().reconnect_count, 1);

    registry.disconnect_all();
    tokio::time::timeout(Duration::from_secs(10), server)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn unreachable_server_reports_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let registry = registry_for(addr);
    let connection = registry.get_connection(
        "/ws/worker/1/",
        Some(ConnectionOptions::default().auto_reconnect(false)),
    );
    let mut events = connection.events();
    connection.connect();

    wait_for(&mut events, |e| matches!(e, ConnectionEvent::Error(_))).await;
    let closed = wait_for(&mut events, |e| {
        matches!(e, ConnectionEvent::Disconnected { .. })
    })
    .await;
    assert!(matches!(closed, ConnectionEvent::Disconnected { code: 1006, .. }));
    assert!(connection.stats().last_error.is_some());
}
