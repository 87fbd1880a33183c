use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A user as it appears inside a resolved message record: just the display
/// fields the store's fetch-resolved query joins in. The hub never talks to
/// the user directory itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: Uuid,
    pub username: String,
}

/// One reaction on a message. A message holds at most one reaction per user;
/// the merge engine enforces that invariant on every write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reaction {
    pub user_id: Uuid,
    pub emoji: String,
}

/// Snippet of the message being replied to, resolved by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub id: Uuid,
    pub sender: UserRef,
    pub text: String,
}

/// A fully resolved message record as broadcast to room subscribers.
/// `read_by` is a combined delivered/read set: both receipt kinds land in the
/// same field, deduplicated by user id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: Uuid,
    pub room: String,
    pub sender: UserRef,
    pub text: String,
    pub file_url: Option<String>,
    pub reply_to: Option<ReplyRef>,
    pub created_at: DateTime<Utc>,
    pub reactions: Vec<Reaction>,
    pub read_by: Vec<UserRef>,
}

/// Persistence request handed to the message store. Built by the hub from an
/// inbound draft after the sender identity has been normalized.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub room: String,
    pub sender_id: Uuid,
    pub text: String,
    pub file_url: Option<String>,
    pub reply_to: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}
