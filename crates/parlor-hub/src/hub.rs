use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{info, warn};
use uuid::Uuid;

use parlor_types::events::{HubEvent, PresenceStatus};
use parlor_types::models::NewMessage;

use crate::presence::PresenceTable;
use crate::reactions;
use crate::receipts;
use crate::store::{MessageStore, StoreError};

/// Deadline for a single message-store call. Exceeding it counts as a store
/// failure for the one operation that made the call.
const STORE_DEADLINE: Duration = Duration::from_secs(5);

struct ConnEntry {
    user_id: Option<Uuid>,
    rooms: HashSet<String>,
    tx: mpsc::UnboundedSender<HubEvent>,
}

/// The event hub: owns the connection registry and presence table, dispatches
/// inbound events to the merge/aggregate engines and the message store, and
/// fans resulting state out to room subscribers.
///
/// Cheap to clone; all state lives behind one shared inner.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    store: Arc<dyn MessageStore>,

    /// Live connections: conn_id -> entry. Room membership lives here too,
    /// so a broadcast to a room is a filtered walk of this map.
    connections: RwLock<HashMap<Uuid, ConnEntry>>,

    /// user_id -> conn_id, the online/offline source of truth.
    presence: RwLock<PresenceTable>,

    /// Per-message locks serializing react/receipt read-modify-write cycles
    /// across connections. Entries are reaped once no operation holds them.
    message_locks: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl Hub {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                connections: RwLock::new(HashMap::new()),
                presence: RwLock::new(PresenceTable::new()),
                message_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection, optionally claiming a user identity. The claim
    /// is trusted as-is; token verification happened upstream at the upgrade
    /// layer. Returns the connection handle and its outbound event queue.
    ///
    /// A connection with an identity first receives the current online-user
    /// snapshot, then everyone (itself included) sees its `online` update.
    pub async fn attach(
        &self,
        user_id: Option<Uuid>,
    ) -> (Uuid, mpsc::UnboundedReceiver<HubEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        // Register before snapshotting: a presence change landing in between
        // then reaches us through the registry, so at worst the client sees a
        // duplicate update, never a missed one.
        self.inner.connections.write().await.insert(
            conn_id,
            ConnEntry {
                user_id,
                rooms: HashSet::new(),
                tx: tx.clone(),
            },
        );

        let snapshot = if user_id.is_some() {
            self.inner.presence.read().await.online_users()
        } else {
            Vec::new()
        };
        for online_id in snapshot {
            let _ = tx.send(HubEvent::PresenceUpdate {
                user_id: online_id,
                status: PresenceStatus::Online,
            });
        }

        if let Some(user_id) = user_id {
            self.inner.presence.write().await.upsert(user_id, conn_id);
            self.broadcast_all(HubEvent::PresenceUpdate {
                user_id,
                status: PresenceStatus::Online,
            })
            .await;
        }

        (conn_id, rx)
    }

    /// Subscribe a connection to a room. Idempotent; unknown connections
    /// (already detached) are ignored.
    pub async fn join_room(&self, conn_id: Uuid, room: &str) {
        let mut connections = self.inner.connections.write().await;
        if let Some(entry) = connections.get_mut(&conn_id) {
            entry.rooms.insert(room.to_string());
        }
    }

    /// Persist a message and broadcast the store's resolved record to the
    /// room. On any store failure the sender alone gets an `error_message`;
    /// there is no retry, the client must resend.
    pub async fn send_message(&self, conn_id: Uuid, draft: NewMessage) {
        let room = draft.room.clone();

        let created = self.with_store(move |store| store.create(draft)).await;

        let message_id = match created {
            Ok(id) => id,
            Err(e) => {
                warn!("message create failed: {}", e);
                self.send_error(conn_id, "failed to send message").await;
                return;
            }
        };

        match self
            .with_store(move |store| store.fetch_resolved(message_id))
            .await
        {
            Ok(message) => {
                self.broadcast_room(&room, HubEvent::ReceiveMessage(message), None)
                    .await;
            }
            Err(e) => {
                warn!("fetch after create failed for {}: {}", message_id, e);
                self.send_error(conn_id, "failed to send message").await;
            }
        }
    }

    /// Toggle `user_id`'s reaction on a message and broadcast the re-fetched
    /// record. The whole fetch-merge-persist cycle holds the message lock so
    /// concurrent reactions from different connections cannot race.
    pub async fn react(
        &self,
        conn_id: Uuid,
        room: &str,
        message_id: Uuid,
        user_id: Uuid,
        emoji: &str,
    ) {
        let lock = self.message_lock(message_id).await;
        let _guard = lock.lock().await;

        let message = match self
            .with_store(move |store| store.fetch_resolved(message_id))
            .await
        {
            Ok(message) => message,
            Err(e) => {
                self.report_lookup_failure(conn_id, "react", message_id, e)
                    .await;
                return;
            }
        };

        let merged = reactions::merge(message.reactions, user_id, emoji);
        let persisted = self
            .with_store(move |store| {
                store.set_reactions(message_id, &merged)?;
                store.fetch_resolved(message_id)
            })
            .await;

        match persisted {
            Ok(updated) => {
                self.broadcast_room(room, HubEvent::ReactionUpdate(updated), None)
                    .await;
            }
            Err(e) => {
                warn!("reaction persist failed for {}: {}", message_id, e);
                self.send_error(conn_id, "failed to update reaction").await;
            }
        }
    }

    /// Relay a typing indicator to everyone else in the room. Stateless,
    /// never persisted, and the sender is excluded.
    pub async fn typing(&self, conn_id: Uuid, room: &str, user_id: Uuid, typing: bool) {
        self.broadcast_room(room, HubEvent::Typing { user_id, typing }, Some(conn_id))
            .await;
    }

    /// Record a delivery receipt and broadcast `delivered` to the room.
    pub async fn mark_delivered(&self, conn_id: Uuid, room: &str, message_id: Uuid, user_id: Uuid) {
        self.receipt(
            conn_id,
            room,
            message_id,
            user_id,
            HubEvent::Delivered { message_id, user_id },
        )
        .await;
    }

    /// Record a read receipt and broadcast `read` to the room.
    pub async fn mark_read(&self, conn_id: Uuid, room: &str, message_id: Uuid, user_id: Uuid) {
        self.receipt(
            conn_id,
            room,
            message_id,
            user_id,
            HubEvent::Read { message_id, user_id },
        )
        .await;
    }

    /// Shared receipt path: delivered and read feed the same combined
    /// `read_by` set. The broadcast is unconditional once the message is
    /// known to exist; the persistence write only happens when the set
    /// actually changed.
    async fn receipt(
        &self,
        conn_id: Uuid,
        room: &str,
        message_id: Uuid,
        user_id: Uuid,
        event: HubEvent,
    ) {
        let lock = self.message_lock(message_id).await;
        let _guard = lock.lock().await;

        let message = match self
            .with_store(move |store| store.fetch_resolved(message_id))
            .await
        {
            Ok(message) => message,
            Err(e) => {
                self.report_lookup_failure(conn_id, "receipt", message_id, e)
                    .await;
                return;
            }
        };

        let read_by: Vec<Uuid> = message.read_by.iter().map(|u| u.id).collect();
        let (read_by, changed) = receipts::mark_seen(read_by, user_id);

        if changed {
            let persisted = self
                .with_store(move |store| store.set_read_by(message_id, &read_by))
                .await;
            if let Err(e) = persisted {
                warn!("receipt persist failed for {}: {}", message_id, e);
                self.send_error(conn_id, "failed to record receipt").await;
                return;
            }
        }

        self.broadcast_room(room, event, None).await;
    }

    /// Drop a connection. Safe to call without a prior attach and idempotent:
    /// a second detach for the same handle finds nothing to clean up. The
    /// offline update only fires if this handle still owns the presence
    /// entry — a newer attach for the same user keeps them online.
    pub async fn detach(&self, conn_id: Uuid) {
        let removed = match self.inner.connections.write().await.remove(&conn_id) {
            Some(entry) => entry,
            None => return,
        };
        info!(
            "connection {} detached (user {:?}, {} rooms)",
            conn_id,
            removed.user_id,
            removed.rooms.len()
        );

        let went_offline = self.inner.presence.write().await.remove_by_handle(conn_id);
        if let Some(user_id) = went_offline {
            info!("{} went offline", user_id);
            self.broadcast_all(HubEvent::PresenceUpdate {
                user_id,
                status: PresenceStatus::Offline,
            })
            .await;
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.inner.presence.read().await.is_online(user_id)
    }

    /// Send a private `error_message` to one connection, never broadcast.
    pub async fn send_error(&self, conn_id: Uuid, message: impl Into<String>) {
        self.send_to_conn(
            conn_id,
            HubEvent::ErrorMessage {
                message: message.into(),
            },
        )
        .await;
    }

    async fn report_lookup_failure(
        &self,
        conn_id: Uuid,
        op: &str,
        message_id: Uuid,
        err: StoreError,
    ) {
        match err {
            StoreError::NotFound => {
                warn!("{} against unknown message {}", op, message_id);
                self.send_error(conn_id, "message not found").await;
            }
            other => {
                warn!("{} fetch failed for {}: {}", op, message_id, other);
                self.send_error(conn_id, "store unavailable").await;
            }
        }
    }

    async fn send_to_conn(&self, conn_id: Uuid, event: HubEvent) {
        let connections = self.inner.connections.read().await;
        if let Some(entry) = connections.get(&conn_id) {
            let _ = entry.tx.send(event);
        }
    }

    /// Fan an event out to every subscriber of `room`, optionally excluding
    /// one connection. Fire-and-forget: a receiver that already hung up is
    /// skipped silently.
    async fn broadcast_room(&self, room: &str, event: HubEvent, exclude: Option<Uuid>) {
        let connections = self.inner.connections.read().await;
        for (conn_id, entry) in connections.iter() {
            if Some(*conn_id) == exclude || !entry.rooms.contains(room) {
                continue;
            }
            let _ = entry.tx.send(event.clone());
        }
    }

    /// Fan an event out to every live connection regardless of rooms
    /// (presence updates use the wildcard scope).
    async fn broadcast_all(&self, event: HubEvent) {
        let connections = self.inner.connections.read().await;
        for entry in connections.values() {
            let _ = entry.tx.send(event.clone());
        }
    }

    /// Run a blocking store call off the async runtime, bounded by
    /// [`STORE_DEADLINE`].
    async fn with_store<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn MessageStore) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.inner.store.clone();
        let call = tokio::task::spawn_blocking(move || f(store.as_ref()));
        match tokio::time::timeout(STORE_DEADLINE, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(StoreError::Backend(format!(
                "store task failed: {join_err}"
            ))),
            Err(_) => Err(StoreError::Backend("store call exceeded deadline".into())),
        }
    }

    /// Fetch (or create) the lock for a message id, reaping locks no
    /// operation holds anymore so the map does not grow with message count.
    async fn message_lock(&self, message_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.inner.message_locks.lock().await;
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry(message_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
