use anyhow::Result;
use rusqlite::Connection;
use tracing::warn;
use uuid::Uuid;

use parlor_hub::store::{MessageStore, StoreError};
use parlor_types::models::{Message, NewMessage, Reaction, ReplyRef, UserRef};

use crate::Database;
use crate::models::{MessageRow, ReactionRow, ReadRow};

impl Database {
    // -- User directory --

    /// Keep the local user directory current. Called by the server when an
    /// authenticated connection attaches, so fetch-resolved queries can join
    /// display names.
    pub fn upsert_user(&self, id: &str, username: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username) VALUES (?1, ?2)
                 ON CONFLICT(id) DO UPDATE SET username = excluded.username",
                (id, username),
            )?;
            Ok(())
        })
    }
}

fn backend(e: anyhow::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl MessageStore for Database {
    fn create(&self, draft: NewMessage) -> Result<Uuid, StoreError> {
        let id = Uuid::new_v4();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, room, sender_id, body, file_url, reply_to, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.to_string(),
                    draft.room,
                    draft.sender_id.to_string(),
                    draft.text,
                    draft.file_url,
                    draft.reply_to.map(|r| r.to_string()),
                    draft.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .map_err(backend)?;
        Ok(id)
    }

    fn fetch_resolved(&self, id: Uuid) -> Result<Message, StoreError> {
        self.with_conn(|conn| resolve_message(conn, &id.to_string()))
            .map_err(backend)?
            .ok_or(StoreError::NotFound)
    }

    fn set_reactions(&self, id: Uuid, reactions: &[Reaction]) -> Result<(), StoreError> {
        let found = self
            .with_conn(|conn| {
                let mid = id.to_string();
                if !message_exists(conn, &mid)? {
                    return Ok(false);
                }
                let tx = conn.unchecked_transaction()?;
                tx.execute("DELETE FROM reactions WHERE message_id = ?1", [&mid])?;
                for (pos, r) in reactions.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO reactions (message_id, user_id, emoji, pos)
                         VALUES (?1, ?2, ?3, ?4)",
                        rusqlite::params![mid, r.user_id.to_string(), r.emoji, pos as i64],
                    )?;
                }
                tx.commit()?;
                Ok(true)
            })
            .map_err(backend)?;

        if found { Ok(()) } else { Err(StoreError::NotFound) }
    }

    fn set_read_by(&self, id: Uuid, read_by: &[Uuid]) -> Result<(), StoreError> {
        let found = self
            .with_conn(|conn| {
                let mid = id.to_string();
                if !message_exists(conn, &mid)? {
                    return Ok(false);
                }
                let tx = conn.unchecked_transaction()?;
                tx.execute("DELETE FROM message_reads WHERE message_id = ?1", [&mid])?;
                for (pos, user_id) in read_by.iter().enumerate() {
                    tx.execute(
                        "INSERT INTO message_reads (message_id, user_id, pos)
                         VALUES (?1, ?2, ?3)",
                        rusqlite::params![mid, user_id.to_string(), pos as i64],
                    )?;
                }
                tx.commit()?;
                Ok(true)
            })
            .map_err(backend)?;

        if found { Ok(()) } else { Err(StoreError::NotFound) }
    }
}

fn message_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found = conn
        .query_row("SELECT 1 FROM messages WHERE id = ?1", [id], |_| Ok(()))
        .optional()?;
    Ok(found.is_some())
}

/// Fetch a message with sender, reply-to snippet, reactions and read-by all
/// resolved in one pass. Returns `None` for an unknown id.
fn resolve_message(conn: &Connection, id: &str) -> Result<Option<Message>> {
    let Some(row) = query_message(conn, id)? else {
        return Ok(None);
    };

    let reply_to = match &row.reply_to {
        Some(parent_id) => query_message(conn, parent_id)?.map(|parent| ReplyRef {
            id: parse_id(&parent.id),
            sender: user_ref(&parent.sender_id, parent.sender_username.clone()),
            text: parent.body,
        }),
        None => None,
    };

    let reactions = query_reactions(conn, id)?
        .into_iter()
        .filter_map(|r| match r.user_id.parse::<Uuid>() {
            Ok(user_id) => Some(Reaction {
                user_id,
                emoji: r.emoji,
            }),
            Err(e) => {
                warn!("Corrupt reaction user_id '{}' on message '{}': {}", r.user_id, id, e);
                None
            }
        })
        .collect();

    let read_by = query_reads(conn, id)?
        .into_iter()
        .filter_map(|r| match r.user_id.parse::<Uuid>() {
            Ok(user_id) => Some(UserRef {
                id: user_id,
                username: r.username.unwrap_or_else(|| "unknown".to_string()),
            }),
            Err(e) => {
                warn!("Corrupt read user_id '{}' on message '{}': {}", r.user_id, id, e);
                None
            }
        })
        .collect();

    Ok(Some(Message {
        id: parse_id(&row.id),
        room: row.room,
        sender: user_ref(&row.sender_id, row.sender_username),
        text: row.body,
        file_url: row.file_url,
        reply_to,
        created_at: parse_timestamp(&row.created_at, &row.id),
        reactions,
        read_by,
    }))
}

fn query_message(conn: &Connection, id: &str) -> Result<Option<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT m.id, m.room, m.sender_id, u.username, m.body, m.file_url, m.reply_to, m.created_at
         FROM messages m
         LEFT JOIN users u ON m.sender_id = u.id
         WHERE m.id = ?1",
    )?;

    let row = stmt
        .query_row([id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                room: row.get(1)?,
                sender_id: row.get(2)?,
                sender_username: row.get(3)?,
                body: row.get(4)?,
                file_url: row.get(5)?,
                reply_to: row.get(6)?,
                created_at: row.get(7)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_reactions(conn: &Connection, message_id: &str) -> Result<Vec<ReactionRow>> {
    let mut stmt = conn.prepare(
        "SELECT user_id, emoji FROM reactions WHERE message_id = ?1 ORDER BY pos",
    )?;

    let rows = stmt
        .query_map([message_id], |row| {
            Ok(ReactionRow {
                user_id: row.get(0)?,
                emoji: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_reads(conn: &Connection, message_id: &str) -> Result<Vec<ReadRow>> {
    let mut stmt = conn.prepare(
        "SELECT r.user_id, u.username
         FROM message_reads r
         LEFT JOIN users u ON r.user_id = u.id
         WHERE r.message_id = ?1
         ORDER BY r.pos",
    )?;

    let rows = stmt
        .query_map([message_id], |row| {
            Ok(ReadRow {
                user_id: row.get(0)?,
                username: row.get(1)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn user_ref(id: &str, username: Option<String>) -> UserRef {
    UserRef {
        id: parse_id(id),
        username: username.unwrap_or_else(|| "unknown".to_string()),
    }
}

fn parse_id(id: &str) -> Uuid {
    id.parse().unwrap_or_else(|e| {
        warn!("Corrupt uuid '{}': {}", id, e);
        Uuid::default()
    })
}

fn parse_timestamp(raw: &str, message_id: &str) -> chrono::DateTime<chrono::Utc> {
    raw.parse::<chrono::DateTime<chrono::Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            // Parse as naive UTC and convert.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt created_at '{}' on message '{}': {}", raw, message_id, e);
            chrono::DateTime::default()
        })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
