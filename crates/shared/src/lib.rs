//! Shared types for the pickup-live real-time client.
//!
//! Wire protocol, domain models and the error taxonomy. Nothing in here
//! depends on an async runtime.

pub mod error;
pub mod models;
pub mod protocol;

pub use error::*;
pub use models::*;
pub use protocol::*;
