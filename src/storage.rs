use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::stream::{self, BoxStream};
use log::debug;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;

use crate::error::Result;
use crate::models::{millis_to_datetime, Message, MessageStatus};

const CHANGE_BUFFER: usize = 64;

const SELECT_COLUMNS: &str = "SELECT id, conversation_id, content, sender_id, timestamp, status FROM messages";

/// Stream of full, newest-first message lists for one conversation.
pub type MessageStream = BoxStream<'static, Result<Vec<Message>>>;

/// Persistent message table plus a change feed keyed by conversation id.
///
/// Every mutation goes through this type so that [`MessageStore::observe`]
/// subscribers see it.
pub struct MessageStore {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<String>,
}

impl MessageStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL,
                content TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                timestamp INTEGER NOT NULL,
                status TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id)",
            [],
        )?;
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Ok(MessageStore {
            conn: Mutex::new(conn),
            changes,
        })
    }

    /// Insert or replace by id. The last write wins.
    pub async fn upsert(&self, message: &Message) -> Result<()> {
        let previous = {
            let conn = self.conn.lock().await;
            let previous = conversation_of(&conn, &message.id)?;
            insert_or_replace(&conn, message)?;
            previous
        };
        if let Some(previous) = previous.filter(|c| *c != message.conversation_id) {
            self.notify(previous);
        }
        self.notify(message.conversation_id.clone());
        Ok(())
    }

    /// Upserts a batch in a single transaction.
    pub async fn upsert_all(&self, messages: &[Message]) -> Result<()> {
        if messages.is_empty() {
            return Ok(());
        }
        let mut touched = BTreeSet::new();
        {
            let mut conn = self.conn.lock().await;
            let tx = conn.transaction()?;
            for message in messages {
                if let Some(previous) = conversation_of(&tx, &message.id)? {
                    touched.insert(previous);
                }
                insert_or_replace(&tx, message)?;
                touched.insert(message.conversation_id.clone());
            }
            tx.commit()?;
        }
        debug!("upserted {} message(s) into {} conversation(s)", messages.len(), touched.len());
        for conversation_id in touched {
            self.notify(conversation_id);
        }
        Ok(())
    }

    /// Overwrites the status of an existing row. Returns `false` when no row
    /// has that id; nothing is inserted in that case.
    pub async fn update_status(&self, id: &str, status: MessageStatus) -> Result<bool> {
        let conversation_id = {
            let conn = self.conn.lock().await;
            let Some(conversation_id) = conversation_of(&conn, id)? else {
                return Ok(false);
            };
            conn.execute(
                "UPDATE messages SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )?;
            conversation_id
        };
        self.notify(conversation_id);
        Ok(true)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let conversation_id = {
            let conn = self.conn.lock().await;
            let Some(conversation_id) = conversation_of(&conn, id)? else {
                return Ok(false);
            };
            conn.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
            conversation_id
        };
        self.notify(conversation_id);
        Ok(true)
    }

    /// Removes every message of a conversation and returns how many went.
    pub async fn delete_conversation(&self, conversation_id: &str) -> Result<usize> {
        let removed = {
            let conn = self.conn.lock().await;
            conn.execute(
                "DELETE FROM messages WHERE conversation_id = ?1",
                params![conversation_id],
            )?
        };
        if removed > 0 {
            self.notify(conversation_id.to_string());
        }
        Ok(removed)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Message>> {
        let conn = self.conn.lock().await;
        let message = conn
            .query_row(&format!("{SELECT_COLUMNS} WHERE id = ?1"), params![id], map_row)
            .optional()?;
        Ok(message)
    }

    /// Current messages of a conversation, newest first.
    pub async fn messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock().await;
        Ok(select_conversation(&conn, conversation_id)?)
    }

    /// Emits the current list right away and again after every change to the
    /// conversation. A subscriber that falls behind re-reads the table, so it
    /// always ends on the latest state even if intermediate ones are skipped.
    pub fn observe(self: &Arc<Self>, conversation_id: &str) -> MessageStream {
        let rx = self.changes.subscribe();
        let state = (Arc::clone(self), conversation_id.to_string(), rx, true);
        Box::pin(stream::unfold(state, |(store, conversation_id, mut rx, first)| async move {
            if !first {
                loop {
                    match rx.recv().await {
                        Ok(changed) if changed == conversation_id => break,
                        Ok(_) => continue,
                        Err(RecvError::Lagged(_)) => break,
                        Err(RecvError::Closed) => return None,
                    }
                }
            }
            let snapshot = store.messages(&conversation_id).await;
            Some((snapshot, (store, conversation_id, rx, false)))
        }))
    }

    fn notify(&self, conversation_id: String) {
        // No receivers is fine; nobody is watching this conversation.
        let _ = self.changes.send(conversation_id);
    }
}

fn insert_or_replace(conn: &Connection, message: &Message) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR REPLACE INTO messages (id, conversation_id, content, sender_id, timestamp, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            message.id,
            message.conversation_id,
            message.content,
            message.sender_id,
            message.timestamp.timestamp_millis(),
            message.status.as_str(),
        ],
    )
}

fn conversation_of(conn: &Connection, id: &str) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT conversation_id FROM messages WHERE id = ?1",
        params![id],
        |row| row.get(0),
    )
    .optional()
}

fn select_conversation(conn: &Connection, conversation_id: &str) -> rusqlite::Result<Vec<Message>> {
    let mut stmt = conn.prepare(&format!(
        "{SELECT_COLUMNS} WHERE conversation_id = ?1 ORDER BY timestamp DESC, id DESC"
    ))?;
    let rows = stmt.query_map(params![conversation_id], map_row)?;
    rows.collect()
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let millis: i64 = row.get(4)?;
    let status: String = row.get(5)?;
    let timestamp = millis_to_datetime(millis)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Integer, e.to_string().into()))?;
    let status = status
        .parse::<MessageStatus>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.to_string().into()))?;
    Ok(Message {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        content: row.get(2)?,
        sender_id: row.get(3)?,
        timestamp,
        status,
        is_from_current_user: false,
    })
}
