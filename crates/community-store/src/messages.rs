use std::collections::HashMap;

use rusqlite::params;

use community_shared::{ChatId, MessageId, UserId};

use crate::database::{now_timestamp, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::{Message, MessageWithSender, User};

const MESSAGE_COLUMNS: &str = "id, chat_id, sender_id, content, read, created_at";

impl Database {
    /// Persist an unread message and advance the chat's `last_message_at`,
    /// both in one transaction.
    pub fn insert_message(
        &self,
        chat_id: ChatId,
        sender_id: UserId,
        content: &str,
    ) -> Result<Message> {
        self.with_transaction(|db| {
            let now = now_timestamp();

            let touched = db.conn().execute(
                "UPDATE chats SET last_message_at = ?1 WHERE id = ?2",
                params![now, chat_id.0],
            )?;
            if touched == 0 {
                return Err(StoreError::NotFound);
            }

            db.conn().execute(
                "INSERT INTO messages (chat_id, sender_id, content, read, created_at)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![chat_id.0, sender_id.0, content, now],
            )?;

            db.get_message(MessageId(db.conn().last_insert_rowid()))
        })
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                params![id.0],
                row_to_message,
            )
            .map_err(StoreError::from_query)
    }

    /// Fetch a message joined with its sender.
    pub fn get_message_with_sender(&self, id: MessageId) -> Result<MessageWithSender> {
        let message = self.get_message(id)?;
        let sender = self.get_user(message.sender_id)?;
        Ok(MessageWithSender { message, sender })
    }

    /// Return the chat history as seen by `reader`, oldest first.
    ///
    /// Every unread message in the chat not sent by `reader` is marked read
    /// before the history is loaded. Messages sent by `reader` are left as
    /// they are.
    pub fn fetch_chat_history(
        &self,
        chat_id: ChatId,
        reader: UserId,
    ) -> Result<Vec<MessageWithSender>> {
        self.with_transaction(|db| {
            let marked = db.conn().execute(
                "UPDATE messages SET read = 1
                 WHERE chat_id = ?1 AND sender_id != ?2 AND read = 0",
                params![chat_id.0, reader.0],
            )?;
            if marked > 0 {
                tracing::debug!(chat = %chat_id, reader = %reader, marked, "messages marked read");
            }

            let mut stmt = db.conn().prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![chat_id.0], row_to_message)?;

            let mut senders: HashMap<UserId, User> = HashMap::new();
            let mut history = Vec::new();
            for row in rows {
                let message = row?;
                let sender = match senders.get(&message.sender_id) {
                    Some(user) => user.clone(),
                    None => {
                        let user = db.get_user(message.sender_id)?;
                        senders.insert(message.sender_id, user.clone());
                        user
                    }
                };
                history.push(MessageWithSender { message, sender });
            }
            Ok(history)
        })
    }

    /// Number of messages in `chat_id` that `reader` has not read.
    pub fn unread_count(&self, chat_id: ChatId, reader: UserId) -> Result<i64> {
        Ok(self.conn().query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1 AND sender_id != ?2 AND read = 0",
            params![chat_id.0, reader.0],
            |row| row.get(0),
        )?)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let created_at: String = row.get(5)?;

    Ok(Message {
        id: MessageId(row.get(0)?),
        chat_id: ChatId(row.get(1)?),
        sender_id: UserId(row.get(2)?),
        content: row.get(3)?,
        read: row.get(4)?,
        created_at: parse_timestamp(5, &created_at)?,
    })
}
