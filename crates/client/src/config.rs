//! Client configuration from environment variables.

use std::time::Duration;

use pickup_live_shared::RealtimeError;
use url::Url;

use crate::stores::StoreConfig;
use crate::ws::{ConnectionConfig, ConnectionOptions, RegistryConfig};

pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";

/// Settings shared by the registry and the store.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeConfig {
    pub ws_url: String,
    pub debug: bool,
    pub reconnect_interval: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub sound_enabled: bool,
    /// `None` keeps transient notifications until dismissed.
    pub notification_ttl: Option<Duration>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        let store = StoreConfig::default();
        Self {
            ws_url: DEFAULT_WS_URL.to_string(),
            debug: false,
            reconnect_interval: ConnectionConfig::DEFAULT_RECONNECT_INTERVAL,
            max_reconnect_attempts: ConnectionConfig::DEFAULT_MAX_RECONNECT_ATTEMPTS,
            heartbeat_interval: ConnectionConfig::DEFAULT_HEARTBEAT_INTERVAL,
            sound_enabled: store.sound_enabled,
            notification_ttl: store.transient_ttl,
        }
    }
}

impl RealtimeConfig {
    /// Parse configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PICKUP_LIVE_WS_URL`: socket base URL, `ws://` or `wss://` (default: "ws://localhost:8000")
    /// - `PICKUP_LIVE_DEBUG`: log frame traffic (default: false)
    /// - `PICKUP_LIVE_RECONNECT_INTERVAL_MS`: backoff base (default: 3000)
    /// - `PICKUP_LIVE_MAX_RECONNECT_ATTEMPTS`: default: 10
    /// - `PICKUP_LIVE_HEARTBEAT_INTERVAL_MS`: 0 disables (default: 30000)
    /// - `PICKUP_LIVE_SOUND`: audible cue on pickup updates (default: true)
    /// - `PICKUP_LIVE_NOTIFICATION_TTL_MS`: transient notification lifetime, 0 keeps them (default: 3000)
    pub fn from_env() -> Result<Self, RealtimeError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, RealtimeError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let ws_url = match var("PICKUP_LIVE_WS_URL") {
            Some(raw) => validate_ws_url(&raw)?,
            None => defaults.ws_url,
        };

        let config = Self {
            ws_url,
            debug: parse_flag("PICKUP_LIVE_DEBUG", var("PICKUP_LIVE_DEBUG"), defaults.debug)?,
            reconnect_interval: parse_millis(
                "PICKUP_LIVE_RECONNECT_INTERVAL_MS",
                var("PICKUP_LIVE_RECONNECT_INTERVAL_MS"),
                defaults.reconnect_interval,
            )?,
            max_reconnect_attempts: match var("PICKUP_LIVE_MAX_RECONNECT_ATTEMPTS") {
                Some(raw) => raw.parse().map_err(|_| {
                    RealtimeError::config(format!(
                        "PICKUP_LIVE_MAX_RECONNECT_ATTEMPTS must be a whole number, got '{}'",
                        raw
                    ))
                })?,
                None => defaults.max_reconnect_attempts,
            },
            heartbeat_interval: parse_millis(
                "PICKUP_LIVE_HEARTBEAT_INTERVAL_MS",
                var("PICKUP_LIVE_HEARTBEAT_INTERVAL_MS"),
                defaults.heartbeat_interval,
            )?,
            sound_enabled: parse_flag("PICKUP_LIVE_SOUND", var("PICKUP_LIVE_SOUND"), defaults.sound_enabled)?,
            notification_ttl: match var("PICKUP_LIVE_NOTIFICATION_TTL_MS") {
                Some(raw) => {
                    let ttl = parse_millis("PICKUP_LIVE_NOTIFICATION_TTL_MS", Some(raw), Duration::ZERO)?;
                    (!ttl.is_zero()).then_some(ttl)
                }
                None => defaults.notification_ttl,
            },
        };

        if config.reconnect_interval.is_zero() {
            return Err(RealtimeError::config(
                "PICKUP_LIVE_RECONNECT_INTERVAL_MS must be greater than zero",
            ));
        }
        Ok(config)
    }

    /// Per-connection defaults for the registry.
    pub fn connection_defaults(&self) -> ConnectionOptions {
        ConnectionOptions::default()
            .reconnect_interval(self.reconnect_interval)
            .max_reconnect_attempts(self.max_reconnect_attempts)
            .heartbeat_interval(self.heartbeat_interval)
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            base_url: self.ws_url.clone(),
            debug: self.debug,
            defaults: self.connection_defaults(),
        }
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            sound_enabled: self.sound_enabled,
            transient_ttl: self.notification_ttl,
            ..StoreConfig::default()
        }
    }
}

fn validate_ws_url(raw: &str) -> Result<String, RealtimeError> {
    let url = Url::parse(raw)
        .map_err(|e| RealtimeError::config(format!("PICKUP_LIVE_WS_URL '{}': {}", raw, e)))?;
    match url.scheme() {
        "ws" | "wss" => Ok(raw.trim_end_matches('/').to_string()),
        other => Err(RealtimeError::config(format!(
            "PICKUP_LIVE_WS_URL must use ws:// or wss://, got '{}://'",
            other
        ))),
    }
}

fn parse_flag(key: &str, raw: Option<String>, default: bool) -> Result<bool, RealtimeError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(RealtimeError::config(format!(
            "{} must be a boolean, got '{}'",
            key, raw
        ))),
    }
}

fn parse_millis(key: &str, raw: Option<String>, default: Duration) -> Result<Duration, RealtimeError> {
    match raw {
        Some(raw) => raw.parse::<u64>().map(Duration::from_millis).map_err(|_| {
            RealtimeError::config(format!("{} must be milliseconds, got '{}'", key, raw))
        }),
        None => Ok(default),
    }
}
