use rusqlite::Connection;

const UP_SQL: &str = r#"
-- One chat per unordered pair, stored with user1_id < user2_id
CREATE TABLE IF NOT EXISTS chats (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    user1_id        INTEGER NOT NULL,
    user2_id        INTEGER NOT NULL,
    last_message_at TEXT,                  -- ISO-8601
    created_at      TEXT NOT NULL,

    CHECK (user1_id < user2_id),
    UNIQUE (user1_id, user2_id),
    FOREIGN KEY (user1_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (user2_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chats_user2 ON chats(user2_id);

CREATE TABLE IF NOT EXISTS messages (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    chat_id    INTEGER NOT NULL,           -- FK -> chats(id)
    sender_id  INTEGER NOT NULL,           -- FK -> users(id)
    content    TEXT NOT NULL,
    read       INTEGER NOT NULL DEFAULT 0, -- boolean 0/1
    created_at TEXT NOT NULL,              -- ISO-8601

    FOREIGN KEY (chat_id) REFERENCES chats(id) ON DELETE CASCADE,
    FOREIGN KEY (sender_id) REFERENCES users(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages(chat_id, id);
"#;

pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
