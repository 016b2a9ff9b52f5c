//! Feature adapters built on top of the registry and the store.

mod chat;
mod pickup;

pub use chat::{ChatRoom, RoomState};
pub use pickup::PickupTracker;
