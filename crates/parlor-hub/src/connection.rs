use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};
use uuid::Uuid;

use parlor_types::events::ClientCommand;
use parlor_types::identity::resolve_identity;
use parlor_types::models::NewMessage;

use crate::hub::Hub;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Identity claimed at attach time. Verified upstream (JWT at the HTTP
/// upgrade layer); the hub takes it on trust.
#[derive(Debug, Clone)]
pub struct AttachIdentity {
    pub user_id: Uuid,
    pub username: String,
}

/// Drive a single WebSocket connection: attach to the hub, pump outbound
/// events and heartbeats, dispatch inbound commands in arrival order, and
/// detach when either direction closes.
pub async fn handle_connection(socket: WebSocket, hub: Hub, identity: Option<AttachIdentity>) {
    let (mut sender, mut receiver) = socket.split();

    match &identity {
        Some(id) => info!("{} ({}) connected", id.username, id.user_id),
        None => info!("anonymous connection attached"),
    }

    let (conn_id, mut events) = hub.attach(identity.as_ref().map(|id| id.user_id)).await;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward hub events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = events.recv() => {
                    let event = match event {
                        Some(event) => event,
                        None => break,
                    };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode event: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read commands from the client, strictly in arrival order
    let hub_recv = hub.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => handle_command(&hub_recv, conn_id, cmd).await,
                    Err(e) => {
                        warn!(
                            "connection {} bad command: {} -- raw: {}",
                            conn_id,
                            e,
                            clip(&text, 200)
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    hub.detach(conn_id).await;
    match &identity {
        Some(id) => info!("{} ({}) disconnected", id.username, id.user_id),
        None => info!("anonymous connection detached"),
    }
}

/// Cap raw client input for log output without splitting a multi-byte
/// character. Message bodies are full of emoji, so a blind byte slice at the
/// cap would panic mid-character and take the whole connection down with it.
fn clip(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Dispatch one inbound command. All wire identities are narrowed here, at
/// the hub boundary, so the hub and the merge engines only ever see canonical
/// user ids. A malformed identity fails just the one command, never the
/// connection.
async fn handle_command(hub: &Hub, conn_id: Uuid, cmd: ClientCommand) {
    match cmd {
        ClientCommand::JoinRoom(room) => {
            hub.join_room(conn_id, &room).await;
        }

        ClientCommand::SendMessage { room, message } => {
            let sender_id = match resolve_identity(&message.sender) {
                Ok(id) => id,
                Err(e) => {
                    warn!("connection {} send_message: {}", conn_id, e);
                    hub.send_error(conn_id, "invalid sender identity").await;
                    return;
                }
            };
            let draft = NewMessage {
                room,
                sender_id,
                text: message.text,
                file_url: message.file_url,
                reply_to: message.reply_to,
                created_at: message.created_at.unwrap_or_else(Utc::now),
            };
            hub.send_message(conn_id, draft).await;
        }

        ClientCommand::React {
            room,
            message_id,
            user_id,
            emoji,
        } => match resolve_identity(&user_id) {
            Ok(user_id) => hub.react(conn_id, &room, message_id, user_id, &emoji).await,
            Err(e) => warn!("connection {} react: {}", conn_id, e),
        },

        ClientCommand::Typing {
            room,
            user_id,
            typing,
        } => match resolve_identity(&user_id) {
            Ok(user_id) => hub.typing(conn_id, &room, user_id, typing).await,
            Err(e) => warn!("connection {} typing: {}", conn_id, e),
        },

        ClientCommand::Delivered {
            room,
            message_id,
            user_id,
        } => match resolve_identity(&user_id) {
            Ok(user_id) => hub.mark_delivered(conn_id, &room, message_id, user_id).await,
            Err(e) => warn!("connection {} delivered: {}", conn_id, e),
        },

        ClientCommand::Read {
            room,
            message_id,
            user_id,
        } => match resolve_identity(&user_id) {
            Ok(user_id) => hub.mark_read(conn_id, &room, message_id, user_id).await,
            Err(e) => warn!("connection {} read: {}", conn_id, e),
        },
    }
}
