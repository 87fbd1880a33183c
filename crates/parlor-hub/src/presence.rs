use std::collections::HashMap;

use uuid::Uuid;

/// In-memory mapping from user identity to the connection currently claiming
/// it — the source of truth for online/offline status.
///
/// At most one entry per user: a later attach for the same user overwrites
/// the earlier handle (multi-device fan-out is not modeled). Owned by the
/// hub and only mutated on its event-processing path.
#[derive(Debug, Default)]
pub struct PresenceTable {
    entries: HashMap<Uuid, Uuid>,
}

impl PresenceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `user_id` to `conn_id`, replacing any earlier handle.
    pub fn upsert(&mut self, user_id: Uuid, conn_id: Uuid) {
        self.entries.insert(user_id, conn_id);
    }

    /// Remove the entry owned by `conn_id`, returning the user that went
    /// offline. A handle that lost its entry to a newer attach (or was never
    /// registered) yields `None`.
    pub fn remove_by_handle(&mut self, conn_id: Uuid) -> Option<Uuid> {
        let user_id = self
            .entries
            .iter()
            .find(|(_, handle)| **handle == conn_id)
            .map(|(user_id, _)| *user_id)?;
        self.entries.remove(&user_id);
        Some(user_id)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.entries.contains_key(&user_id)
    }

    /// Snapshot of all online users, sent to freshly attached connections.
    pub fn online_users(&self) -> Vec<Uuid> {
        self.entries.keys().copied().collect()
    }
}
