//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` (camelCase) so it can be handed directly
//! to the HTTP and WebSocket layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use community_shared::rank::SystemRank;
use community_shared::{ChatId, Gender, MessageId, RankId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A registered community member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    /// Telegram account the user signed in with, if known.
    pub telegram_id: Option<i64>,
    pub username: String,
    pub gender: Gender,
    /// Accumulated activity points. Never decreases.
    pub activity_points: i64,
    /// Displayed rank name. Cache of the resolved system rank unless an
    /// admin pinned a custom rank.
    pub rank: String,
    pub is_online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields supplied when registering a user.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub username: String,
    #[serde(default)]
    pub gender: Gender,
    #[serde(default)]
    pub telegram_id: Option<i64>,
}

// ---------------------------------------------------------------------------
// Rank
// ---------------------------------------------------------------------------

/// A persisted rank: either a system tier or an admin-created custom rank.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Rank {
    pub id: RankId,
    pub name: String,
    pub description: Option<String>,
    pub is_system: bool,
    /// 1..N for system ranks, 0 for custom ranks.
    pub level: u8,
    /// Top-tier qualifier; `None` everywhere else.
    pub gender: Option<Gender>,
    pub created_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
}

impl Rank {
    /// View this row as a system rank, if it is one.
    pub fn as_system_rank(&self) -> Option<SystemRank> {
        self.is_system.then(|| SystemRank {
            name: self.name.clone(),
            level: self.level,
            gender: self.gender,
        })
    }
}

/// Fields supplied when an admin creates a custom rank.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRank {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// A user-rank assignment row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserRank {
    pub user_id: UserId,
    pub rank_id: RankId,
    pub is_active: bool,
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
}

/// A rank held by a user, joined with its assignment data.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HeldRank {
    #[serde(flatten)]
    pub rank: Rank,
    pub is_active: bool,
    pub assigned_by: Option<UserId>,
    pub assigned_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

/// A direct conversation between two users.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub id: ChatId,
    /// Lower participant id.
    pub user1_id: UserId,
    /// Higher participant id.
    pub user2_id: UserId,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Chat {
    pub fn has_participant(&self, user_id: UserId) -> bool {
        self.user1_id == user_id || self.user2_id == user_id
    }

    /// The participant that is not `user_id`, or `None` if `user_id` is not
    /// in this chat.
    pub fn other_participant(&self, user_id: UserId) -> Option<UserId> {
        if self.user1_id == user_id {
            Some(self.user2_id)
        } else if self.user2_id == user_id {
            Some(self.user1_id)
        } else {
            None
        }
    }
}

/// A chat as listed for one of its participants.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    #[serde(flatten)]
    pub chat: Chat,
    pub peer: User,
    pub unread_count: i64,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// A single chat message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    /// Set once the recipient has fetched the chat history.
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

/// A message joined with its sender, as delivered to clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageWithSender {
    #[serde(flatten)]
    pub message: Message,
    pub sender: User,
}
