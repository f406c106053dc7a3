//! CRUD operations for [`Chat`] records.

use rusqlite::params;

use community_shared::{ChatId, UserId};

use crate::database::{now_timestamp, parse_optional_timestamp, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::{Chat, ChatSummary};

const CHAT_COLUMNS: &str = "id, user1_id, user2_id, last_message_at, created_at";

impl Database {
    /// Return the chat between `a` and `b`, creating it on first use.
    ///
    /// Participants are stored in canonical order, so the argument order does
    /// not matter. A user cannot open a chat with themselves.
    pub fn get_or_create_chat(&self, a: UserId, b: UserId) -> Result<Chat> {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        self.conn().execute(
            "INSERT OR IGNORE INTO chats (user1_id, user2_id, created_at)
             VALUES (?1, ?2, ?3)",
            params![low.0, high.0, now_timestamp()],
        )?;

        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE user1_id = ?1 AND user2_id = ?2"),
                params![low.0, high.0],
                row_to_chat,
            )
            .map_err(StoreError::from_query)
    }

    pub fn get_chat(&self, id: ChatId) -> Result<Chat> {
        self.conn()
            .query_row(
                &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                params![id.0],
                row_to_chat,
            )
            .map_err(StoreError::from_query)
    }

    /// Chats of `user_id`, most recently active first, with the peer and
    /// the number of messages `user_id` has not read yet.
    pub fn list_chats_for_user(&self, user_id: UserId) -> Result<Vec<ChatSummary>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {CHAT_COLUMNS}
             FROM chats
             WHERE user1_id = ?1 OR user2_id = ?1
             ORDER BY COALESCE(last_message_at, created_at) DESC, id DESC"
        ))?;

        let rows = stmt.query_map(params![user_id.0], row_to_chat)?;

        let mut chats = Vec::new();
        for row in rows {
            chats.push(row?);
        }

        let mut summaries = Vec::with_capacity(chats.len());
        for chat in chats {
            let peer_id = chat.other_participant(user_id).ok_or(StoreError::NotFound)?;
            summaries.push(ChatSummary {
                peer: self.get_user(peer_id)?,
                unread_count: self.unread_count(chat.id, user_id)?,
                chat,
            });
        }
        Ok(summaries)
    }
}

fn row_to_chat(row: &rusqlite::Row<'_>) -> rusqlite::Result<Chat> {
    let last_message_at: Option<String> = row.get(3)?;
    let created_at: String = row.get(4)?;

    Ok(Chat {
        id: ChatId(row.get(0)?),
        user1_id: UserId(row.get(1)?),
        user2_id: UserId(row.get(2)?),
        last_message_at: parse_optional_timestamp(3, last_message_at)?,
        created_at: parse_timestamp(4, &created_at)?,
    })
}
