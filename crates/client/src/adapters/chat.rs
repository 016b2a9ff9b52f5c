//! Chat room over `/ws/chat/{room}/`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Display;
use std::sync::{Arc, Mutex};

use pickup_live_shared::{endpoints, message_types, ChatMessage, InboundMessage};
use serde::Serialize;

use crate::lock;
use crate::ws::{Connection, ConnectionEvent, ConnectionRegistry, ListenerId};

/// What a room member sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoomState {
    /// Sorted by `created_at`, unique by id.
    pub messages: Vec<ChatMessage>,
    /// Readers per message id.
    pub read_by: BTreeMap<u64, BTreeSet<u64>>,
    pub typing: BTreeSet<u64>,
    pub online: BTreeSet<u64>,
}

impl RoomState {
    /// Add a message, maintaining sort order by created_at.
    /// Returns false if a message with the same ID already exists.
    pub fn add_message(&mut self, msg: ChatMessage) -> bool {
        if self.messages.iter().any(|m| m.id == msg.id) {
            return false;
        }
        let pos = self
            .messages
            .partition_point(|m| m.created_at <= msg.created_at);
        // A message implies its sender stopped typing.
        self.typing.remove(&msg.sender_id);
        self.messages.insert(pos, msg);
        true
    }

    /// Fold one inbound message into the room. Returns whether it was a room type.
    pub fn apply(&mut self, message: &InboundMessage) -> bool {
        match message {
            InboundMessage::ChatMessage(msg) => {
                self.add_message(msg.clone());
            }
            InboundMessage::Read(receipt) => {
                self.read_by
                    .entry(receipt.message_id)
                    .or_default()
                    .insert(receipt.user_id);
            }
            InboundMessage::Typing(indicator) => {
                if indicator.is_typing {
                    self.typing.insert(indicator.user_id);
                } else {
                    self.typing.remove(&indicator.user_id);
                }
            }
            InboundMessage::Presence(presence) => {
                if presence.online {
                    self.online.insert(presence.user_id);
                } else {
                    self.online.remove(&presence.user_id);
                    self.typing.remove(&presence.user_id);
                }
            }
            _ => return false,
        }
        true
    }

    pub fn is_read_by(&self, message_id: u64, user_id: u64) -> bool {
        self.read_by
            .get(&message_id)
            .is_some_and(|readers| readers.contains(&user_id))
    }
}

#[derive(Serialize)]
struct MessageIntent<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct ReadIntent {
    message_id: u64,
}

#[derive(Serialize)]
struct TypingIntent {
    is_typing: bool,
}

/// A joined chat room.
///
/// Dropping the room stops folding events into it; [`leave`](Self::leave)
/// also closes the room's socket.
pub struct ChatRoom {
    room_id: String,
    registry: Arc<ConnectionRegistry>,
    connection: Connection,
    state: Arc<Mutex<RoomState>>,
    listener: ListenerId,
}

impl ChatRoom {
    pub fn join(registry: &Arc<ConnectionRegistry>, room_id: impl Display) -> Self {
        let room_id = room_id.to_string();
        let connection = registry.get_connection(&endpoints::chat(&room_id), None);
        let state = Arc::new(Mutex::new(RoomState::default()));

        let room = state.clone();
        let listener = connection.on(move |event| {
            if let ConnectionEvent::Inbound(message) = event {
                lock(&room).apply(message);
            }
        });
        connection.connect();
        crate::log_info!("Joined chat room {}", room_id);

        Self {
            room_id,
            registry: registry.clone(),
            connection,
            state,
            listener,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn state(&self) -> RoomState {
        lock(&self.state).clone()
    }

    pub fn send_message(&self, content: &str) -> bool {
        self.connection
            .send_json(message_types::CHAT_MESSAGE, &MessageIntent { content })
    }

    pub fn mark_read(&self, message_id: u64) -> bool {
        self.connection
            .send_json(message_types::READ, &ReadIntent { message_id })
    }

    pub fn set_typing(&self, is_typing: bool) -> bool {
        self.connection
            .send_json(message_types::TYPING, &TypingIntent { is_typing })
    }

    /// Detach from the room and close its socket.
    pub fn leave(self) {
        self.registry.disconnect(self.connection.endpoint());
        crate::log_info!("Left chat room {}", self.room_id);
    }
}

impl Drop for ChatRoom {
    fn drop(&mut self) {
        self.connection.off(self.listener);
    }
}
