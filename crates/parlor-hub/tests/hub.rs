use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use uuid::Uuid;

use parlor_hub::hub::Hub;
use parlor_hub::store::{MessageStore, StoreError};
use parlor_types::events::{HubEvent, PresenceStatus};
use parlor_types::models::{Message, NewMessage, Reaction, ReplyRef, UserRef};

/// In-memory store standing in for the real persistence collaborator.
struct MockStore {
    directory: Mutex<HashMap<Uuid, String>>,
    messages: Mutex<HashMap<Uuid, StoredMessage>>,
    fail_creates: AtomicBool,
    read_by_writes: AtomicUsize,
}

#[derive(Clone)]
struct StoredMessage {
    draft: NewMessage,
    reactions: Vec<Reaction>,
    read_by: Vec<Uuid>,
}

impl MockStore {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            directory: Mutex::new(HashMap::new()),
            messages: Mutex::new(HashMap::new()),
            fail_creates: AtomicBool::new(false),
            read_by_writes: AtomicUsize::new(0),
        })
    }

    fn add_user(&self, name: &str) -> Uuid {
        let id = Uuid::new_v4();
        self.directory.lock().unwrap().insert(id, name.to_string());
        id
    }

    fn user_ref(&self, id: Uuid) -> UserRef {
        let directory = self.directory.lock().unwrap();
        UserRef {
            id,
            username: directory.get(&id).cloned().unwrap_or_else(|| "unknown".into()),
        }
    }
}

impl MessageStore for MockStore {
    fn create(&self, draft: NewMessage) -> Result<Uuid, StoreError> {
        if self.fail_creates.load(Ordering::Relaxed) {
            return Err(StoreError::Backend("disk full".into()));
        }
        let id = Uuid::new_v4();
        self.messages.lock().unwrap().insert(
            id,
            StoredMessage {
                draft,
                reactions: vec![],
                read_by: vec![],
            },
        );
        Ok(id)
    }

    fn fetch_resolved(&self, id: Uuid) -> Result<Message, StoreError> {
        let messages = self.messages.lock().unwrap();
        let stored = messages.get(&id).ok_or(StoreError::NotFound)?;
        let reply_to = stored.draft.reply_to.and_then(|reply_id| {
            messages.get(&reply_id).map(|parent| ReplyRef {
                id: reply_id,
                sender: self.user_ref(parent.draft.sender_id),
                text: parent.draft.text.clone(),
            })
        });
        Ok(Message {
            id,
            room: stored.draft.room.clone(),
            sender: self.user_ref(stored.draft.sender_id),
            text: stored.draft.text.clone(),
            file_url: stored.draft.file_url.clone(),
            reply_to,
            created_at: stored.draft.created_at,
            reactions: stored.reactions.clone(),
            read_by: stored.read_by.iter().map(|&uid| self.user_ref(uid)).collect(),
        })
    }

    fn set_reactions(&self, id: Uuid, reactions: &[Reaction]) -> Result<(), StoreError> {
        let mut messages = self.messages.lock().unwrap();
        let stored = messages.get_mut(&id).ok_or(StoreError::NotFound)?;
        stored.reactions = reactions.to_vec();
        Ok(())
    }

    fn set_read_by(&self, id: Uuid, read_by: &[Uuid]) -> Result<(), StoreError> {
        self.read_by_writes.fetch_add(1, Ordering::Relaxed);
        let mut messages = self.messages.lock().unwrap();
        let stored = messages.get_mut(&id).ok_or(StoreError::NotFound)?;
        stored.read_by = read_by.to_vec();
        Ok(())
    }
}

fn draft(room: &str, sender_id: Uuid, text: &str) -> NewMessage {
    NewMessage {
        room: room.to_string(),
        sender_id,
        text: text.to_string(),
        file_url: None,
        reply_to: None,
        created_at: Utc::now(),
    }
}

fn recv_now(rx: &mut UnboundedReceiver<HubEvent>) -> HubEvent {
    rx.try_recv().expect("expected a pending event")
}

fn assert_empty(rx: &mut UnboundedReceiver<HubEvent>) {
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn send_message_fans_out_resolved_record() {
    let store = MockStore::new();
    let sender = store.add_user("ana");
    let hub = Hub::new(store.clone());

    let (conn_a, mut rx_a) = hub.attach(None).await;
    let (conn_b, mut rx_b) = hub.attach(None).await;
    hub.join_room(conn_a, "general").await;
    hub.join_room(conn_b, "general").await;

    hub.send_message(conn_a, draft("general", sender, "hi")).await;

    for rx in [&mut rx_a, &mut rx_b] {
        match recv_now(rx) {
            HubEvent::ReceiveMessage(msg) => {
                assert_eq!(msg.sender, UserRef { id: sender, username: "ana".into() });
                assert_eq!(msg.text, "hi");
                assert_eq!(msg.room, "general");
                assert!(msg.reactions.is_empty());
                assert!(msg.read_by.is_empty());
            }
            other => panic!("expected receive_message, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn message_is_not_broadcast_outside_its_room() {
    let store = MockStore::new();
    let sender = store.add_user("ana");
    let hub = Hub::new(store);

    let (conn_a, _rx_a) = hub.attach(None).await;
    let (conn_b, mut rx_b) = hub.attach(None).await;
    hub.join_room(conn_a, "general").await;
    hub.join_room(conn_b, "random").await;

    hub.send_message(conn_a, draft("general", sender, "hi")).await;

    assert_empty(&mut rx_b);
}

#[tokio::test]
async fn react_twice_with_same_emoji_toggles_off() {
    let store = MockStore::new();
    let sender = store.add_user("ana");
    let reactor = store.add_user("bo");
    let hub = Hub::new(store.clone());

    let (conn, mut rx) = hub.attach(None).await;
    hub.join_room(conn, "general").await;

    hub.send_message(conn, draft("general", sender, "hi")).await;
    let message_id = match recv_now(&mut rx) {
        HubEvent::ReceiveMessage(msg) => msg.id,
        other => panic!("expected receive_message, got {:?}", other),
    };

    hub.react(conn, "general", message_id, reactor, "👍").await;
    match recv_now(&mut rx) {
        HubEvent::ReactionUpdate(msg) => {
            assert_eq!(msg.reactions, vec![Reaction { user_id: reactor, emoji: "👍".into() }]);
        }
        other => panic!("expected reaction_update, got {:?}", other),
    }

    hub.react(conn, "general", message_id, reactor, "👍").await;
    match recv_now(&mut rx) {
        HubEvent::ReactionUpdate(msg) => assert!(msg.reactions.is_empty()),
        other => panic!("expected reaction_update, got {:?}", other),
    }
}

#[tokio::test]
async fn react_with_new_emoji_replaces_old_one() {
    let store = MockStore::new();
    let sender = store.add_user("ana");
    let reactor = store.add_user("bo");
    let hub = Hub::new(store.clone());

    let (conn, mut rx) = hub.attach(None).await;
    hub.join_room(conn, "general").await;
    hub.send_message(conn, draft("general", sender, "hi")).await;
    let message_id = match recv_now(&mut rx) {
        HubEvent::ReceiveMessage(msg) => msg.id,
        other => panic!("expected receive_message, got {:?}", other),
    };

    hub.react(conn, "general", message_id, reactor, "👍").await;
    recv_now(&mut rx);
    hub.react(conn, "general", message_id, reactor, "❤️").await;
    match recv_now(&mut rx) {
        HubEvent::ReactionUpdate(msg) => {
            assert_eq!(msg.reactions, vec![Reaction { user_id: reactor, emoji: "❤️".into() }]);
        }
        other => panic!("expected reaction_update, got {:?}", other),
    }
}

#[tokio::test]
async fn react_on_unknown_message_reports_privately() {
    let store = MockStore::new();
    let hub = Hub::new(store);

    let (conn_a, mut rx_a) = hub.attach(None).await;
    let (conn_b, mut rx_b) = hub.attach(None).await;
    hub.join_room(conn_a, "general").await;
    hub.join_room(conn_b, "general").await;

    hub.react(conn_a, "general", Uuid::new_v4(), Uuid::new_v4(), "👍").await;

    match recv_now(&mut rx_a) {
        HubEvent::ErrorMessage { message } => assert_eq!(message, "message not found"),
        other => panic!("expected error_message, got {:?}", other),
    }
    assert_empty(&mut rx_b);
}

#[tokio::test]
async fn create_failure_is_reported_only_to_sender() {
    let store = MockStore::new();
    let sender = store.add_user("ana");
    store.fail_creates.store(true, Ordering::Relaxed);
    let hub = Hub::new(store.clone());

    let (conn_a, mut rx_a) = hub.attach(None).await;
    let (conn_b, mut rx_b) = hub.attach(None).await;
    hub.join_room(conn_a, "general").await;
    hub.join_room(conn_b, "general").await;

    hub.send_message(conn_a, draft("general", sender, "hi")).await;

    match recv_now(&mut rx_a) {
        HubEvent::ErrorMessage { .. } => {}
        other => panic!("expected error_message, got {:?}", other),
    }
    assert_empty(&mut rx_b);

    // The hub keeps serving after a store failure.
    store.fail_creates.store(false, Ordering::Relaxed);
    hub.send_message(conn_a, draft("general", sender, "again")).await;
    match recv_now(&mut rx_b) {
        HubEvent::ReceiveMessage(msg) => assert_eq!(msg.text, "again"),
        other => panic!("expected receive_message, got {:?}", other),
    }
}

#[tokio::test]
async fn typing_excludes_the_sender() {
    let store = MockStore::new();
    let user = store.add_user("ana");
    let hub = Hub::new(store);

    let (conn_a, mut rx_a) = hub.attach(None).await;
    let (conn_b, mut rx_b) = hub.attach(None).await;
    hub.join_room(conn_a, "general").await;
    hub.join_room(conn_b, "general").await;

    hub.typing(conn_a, "general", user, true).await;

    assert_eq!(
        recv_now(&mut rx_b),
        HubEvent::Typing { user_id: user, typing: true }
    );
    assert_empty(&mut rx_a);
}

#[tokio::test]
async fn delivered_and_read_share_one_set_and_skip_redundant_writes() {
    let store = MockStore::new();
    let sender = store.add_user("ana");
    let reader = store.add_user("bo");
    let hub = Hub::new(store.clone());

    let (conn, mut rx) = hub.attach(None).await;
    hub.join_room(conn, "general").await;
    hub.send_message(conn, draft("general", sender, "hi")).await;
    let message_id = match recv_now(&mut rx) {
        HubEvent::ReceiveMessage(msg) => msg.id,
        other => panic!("expected receive_message, got {:?}", other),
    };

    hub.mark_delivered(conn, "general", message_id, reader).await;
    assert_eq!(
        recv_now(&mut rx),
        HubEvent::Delivered { message_id, user_id: reader }
    );

    // Read by the same user: set unchanged, no second write, but the
    // broadcast still goes out.
    hub.mark_read(conn, "general", message_id, reader).await;
    assert_eq!(
        recv_now(&mut rx),
        HubEvent::Read { message_id, user_id: reader }
    );

    assert_eq!(store.read_by_writes.load(Ordering::Relaxed), 1);

    let resolved = store.fetch_resolved(message_id).unwrap();
    assert_eq!(
        resolved.read_by,
        vec![UserRef { id: reader, username: "bo".into() }]
    );
}

#[tokio::test]
async fn attach_then_detach_emits_online_then_offline() {
    let store = MockStore::new();
    let user = store.add_user("ana");
    let hub = Hub::new(store);

    let (_observer, mut observer_rx) = hub.attach(None).await;

    let (conn, _rx) = hub.attach(Some(user)).await;
    assert!(hub.is_online(user).await);

    hub.detach(conn).await;
    assert!(!hub.is_online(user).await);

    assert_eq!(
        recv_now(&mut observer_rx),
        HubEvent::PresenceUpdate { user_id: user, status: PresenceStatus::Online }
    );
    assert_eq!(
        recv_now(&mut observer_rx),
        HubEvent::PresenceUpdate { user_id: user, status: PresenceStatus::Offline }
    );
    assert_empty(&mut observer_rx);
}

#[tokio::test]
async fn fresh_attach_receives_online_snapshot() {
    let store = MockStore::new();
    let first = store.add_user("ana");
    let second = store.add_user("bo");
    let hub = Hub::new(store);

    let (_conn_a, _rx_a) = hub.attach(Some(first)).await;
    let (_conn_b, mut rx_b) = hub.attach(Some(second)).await;

    // Snapshot of who was already online, then our own broadcast.
    assert_eq!(
        recv_now(&mut rx_b),
        HubEvent::PresenceUpdate { user_id: first, status: PresenceStatus::Online }
    );
    assert_eq!(
        recv_now(&mut rx_b),
        HubEvent::PresenceUpdate { user_id: second, status: PresenceStatus::Online }
    );
}

#[tokio::test]
async fn concurrent_attaches_never_miss_each_other() {
    let store = MockStore::new();
    let users: Vec<Uuid> = (0..16).map(|i| store.add_user(&format!("u{i}"))).collect();
    let hub = Hub::new(store);

    let mut handles = Vec::new();
    for &user in &users {
        let hub = hub.clone();
        handles.push(tokio::spawn(async move { hub.attach(Some(user)).await }));
    }

    // Whether a peer lands in the snapshot or arrives as a broadcast, every
    // connection must end up knowing about every user.
    for handle in handles {
        let (_conn, mut rx) = handle.await.unwrap();
        let mut seen = std::collections::HashSet::new();
        while let Ok(event) = rx.try_recv() {
            if let HubEvent::PresenceUpdate { user_id, status: PresenceStatus::Online } = event {
                seen.insert(user_id);
            }
        }
        for user in &users {
            assert!(seen.contains(user), "a connection missed {user} going online");
        }
    }
}

#[tokio::test]
async fn reattach_keeps_user_online_when_stale_handle_detaches() {
    let store = MockStore::new();
    let user = store.add_user("ana");
    let hub = Hub::new(store);

    let (_observer, mut observer_rx) = hub.attach(None).await;
    let (old_conn, _old_rx) = hub.attach(Some(user)).await;
    let (_new_conn, _new_rx) = hub.attach(Some(user)).await;

    hub.detach(old_conn).await;
    assert!(hub.is_online(user).await);

    // online from each attach, but no offline for the stale handle
    assert_eq!(
        recv_now(&mut observer_rx),
        HubEvent::PresenceUpdate { user_id: user, status: PresenceStatus::Online }
    );
    assert_eq!(
        recv_now(&mut observer_rx),
        HubEvent::PresenceUpdate { user_id: user, status: PresenceStatus::Online }
    );
    assert_empty(&mut observer_rx);
}

#[tokio::test]
async fn detach_is_idempotent_and_safe_without_attach() {
    let store = MockStore::new();
    let user = store.add_user("ana");
    let hub = Hub::new(store);

    // Never attached: no-op.
    hub.detach(Uuid::new_v4()).await;

    let (conn, _rx) = hub.attach(Some(user)).await;
    hub.detach(conn).await;
    hub.detach(conn).await;
    assert!(!hub.is_online(user).await);
}

#[tokio::test]
async fn join_room_is_idempotent() {
    let store = MockStore::new();
    let sender = store.add_user("ana");
    let hub = Hub::new(store);

    let (conn, mut rx) = hub.attach(None).await;
    hub.join_room(conn, "general").await;
    hub.join_room(conn, "general").await;

    hub.send_message(conn, draft("general", sender, "hi")).await;

    // One subscription, one delivery.
    recv_now(&mut rx);
    assert_empty(&mut rx);
}
