use thiserror::Error;
use uuid::Uuid;

use parlor_types::models::{Message, NewMessage, Reaction};

/// Failures surfaced by a message store implementation.
///
/// `NotFound` is the only variant the hub treats specially (react/receipt
/// events against a stale message id); everything else collapses into
/// `Backend` and fails just the one operation that hit it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message not found")]
    NotFound,
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Contract between the hub and the persistent message store.
///
/// Methods are blocking; the hub runs them under `spawn_blocking` with a
/// deadline. Resolution of sender/reply/read-by display fields is entirely
/// the store's job — the hub never queries the user directory directly and
/// never keeps a second copy of message state across calls.
pub trait MessageStore: Send + Sync {
    /// Persist a new message, returning its id.
    fn create(&self, draft: NewMessage) -> Result<Uuid, StoreError>;

    /// Fetch a message with sender, reply-to and read-by fields resolved.
    fn fetch_resolved(&self, id: Uuid) -> Result<Message, StoreError>;

    /// Replace a message's reaction set wholesale, preserving order.
    fn set_reactions(&self, id: Uuid, reactions: &[Reaction]) -> Result<(), StoreError>;

    /// Replace a message's combined delivered/read set.
    fn set_read_by(&self, id: Uuid, read_by: &[Uuid]) -> Result<(), StoreError>;
}
