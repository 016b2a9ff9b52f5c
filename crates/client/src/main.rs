//! Pickup Live monitor - Main entry point
//!
//! Opens the real-time channels for one user session and logs what the store
//! sees until Ctrl-C.

use std::sync::Arc;

use anyhow::{Context, Result};
use pickup_live_client::{
    logging, ConnectionRegistry, RealtimeConfig, RealtimeStore, TerminalBell,
    TungsteniteConnector,
};
use pickup_live_shared::{Role, SystemNotification};

#[tokio::main]
async fn main() -> Result<()> {
    logging::init("pickup_live_client=info,pickup_live_monitor=info");

    let config = RealtimeConfig::from_env().context("loading configuration")?;
    let token = std::env::var("PICKUP_LIVE_TOKEN").context("PICKUP_LIVE_TOKEN is not set")?;
    let user_id = std::env::var("PICKUP_LIVE_USER_ID").context("PICKUP_LIVE_USER_ID is not set")?;
    let role: Role = std::env::var("PICKUP_LIVE_ROLE")
        .unwrap_or_else(|_| "customer".to_string())
        .parse()
        .context("PICKUP_LIVE_ROLE")?;

    let registry = Arc::new(ConnectionRegistry::new(
        config.registry_config(),
        Arc::new(TungsteniteConnector),
    ));
    let store = RealtimeStore::new(registry, config.store_config(), Arc::new(TerminalBell));

    store.subscribe(
        |s| s.global_connected,
        |connected: &bool| tracing::info!(connected = *connected, "connectivity changed"),
    );
    store.subscribe(
        |s| s.active_pickups().count(),
        |count: &usize| tracing::info!(active = *count, "active pickups"),
    );
    store.subscribe(
        |s| s.unread_count(),
        |count: &usize| tracing::info!(unread = *count, "unread notifications"),
    );
    store.subscribe(
        |s| s.notifications.front().cloned(),
        |newest: &Option<SystemNotification>| {
            if let Some(n) = newest {
                tracing::info!(kind = ?n.kind, title = %n.title, "{}", n.message);
            }
        },
    );

    let connections = store.initialize_connections(&token, &user_id, role);
    tracing::info!(
        endpoints = ?connections.iter().map(|c| c.endpoint().to_string()).collect::<Vec<_>>(),
        "monitoring as {} {}",
        role,
        user_id
    );

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;

    tracing::info!("shutting down");
    store.disconnect_all();
    store.registry().teardown();
    Ok(())
}
