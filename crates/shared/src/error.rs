//! Shared error types for the real-time layer.

use thiserror::Error;

/// Failures surfaced by connections, the registry and configuration loading.
///
/// Every variant is local to a single endpoint: one connection failing never
/// corrupts another connection or the store. The type is `Clone` so it can be
/// carried inside connection events.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RealtimeError {
    /// The transport failed to open or to accept an outgoing frame.
    #[error("connection error: {0}")]
    Connection(String),
    /// An inbound frame was not a valid envelope, or its payload did not
    /// match the declared message type.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// `send` was called while the connection was not open.
    #[error("send rejected: connection is {state}")]
    SendRejected { state: String },
    /// Automatic reconnection gave up.
    #[error("connection lost after {attempts} reconnection attempts")]
    ReconnectExhausted { attempts: u32 },
    /// Environment or caller-supplied configuration was invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RealtimeError {
    pub fn connection(detail: impl Into<String>) -> Self {
        Self::Connection(detail.into())
    }

    pub fn protocol(detail: impl Into<String>) -> Self {
        Self::Protocol(detail.into())
    }

    pub fn config(detail: impl Into<String>) -> Self {
        Self::Config(detail.into())
    }
}

impl From<serde_json::Error> for RealtimeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages_are_user_facing() {
        assert_eq!(
            RealtimeError::SendRejected {
                state: "reconnecting".into()
            }
            .to_string(),
            "send rejected: connection is reconnecting"
        );
        assert_eq!(
            RealtimeError::ReconnectExhausted { attempts: 3 }.to_string(),
            "connection lost after 3 reconnection attempts"
        );
    }

    #[test]
    fn json_errors_become_protocol_errors() {
        let err: RealtimeError = serde_json::from_str::<serde_json::Value>("{oops")
            .unwrap_err()
            .into();
        assert!(matches!(err, RealtimeError::Protocol(_)));
    }
}
