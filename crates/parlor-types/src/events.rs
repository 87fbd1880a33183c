use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::IdentityRef;
use crate::models::Message;

/// Commands sent FROM client TO hub over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientCommand {
    /// Subscribe this connection to a room's broadcasts.
    JoinRoom(String),

    /// Post a message to a room.
    SendMessage { room: String, message: DraftMessage },

    /// Toggle a reaction on a message.
    React {
        room: String,
        message_id: Uuid,
        user_id: IdentityRef,
        emoji: String,
    },

    /// Typing indicator — relayed to everyone else in the room, never stored.
    Typing {
        room: String,
        user_id: IdentityRef,
        typing: bool,
    },

    /// Delivery receipt for a message.
    Delivered {
        room: String,
        message_id: Uuid,
        user_id: IdentityRef,
    },

    /// Read receipt for a message.
    Read {
        room: String,
        message_id: Uuid,
        user_id: IdentityRef,
    },
}

/// Message body of a `send_message` command, before persistence.
/// `created_at` defaults to the hub's clock when the client omits it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftMessage {
    pub sender: IdentityRef,
    pub text: String,
    #[serde(default)]
    pub file_url: Option<String>,
    #[serde(default)]
    pub reply_to: Option<Uuid>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Events sent FROM hub TO clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum HubEvent {
    /// A message was persisted; payload is the store's resolved record.
    ReceiveMessage(Message),

    /// A message's reaction set changed; payload is the full re-fetched record.
    ReactionUpdate(Message),

    /// Someone else in the room is (or stopped) typing.
    Typing { user_id: Uuid, typing: bool },

    /// A user acknowledged delivery of a message.
    Delivered { message_id: Uuid, user_id: Uuid },

    /// A user read a message.
    Read { message_id: Uuid, user_id: Uuid },

    /// A user came online or went offline.
    PresenceUpdate {
        user_id: Uuid,
        status: PresenceStatus,
    },

    /// Operation failed; sent privately to the originating connection only.
    ErrorMessage { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}
