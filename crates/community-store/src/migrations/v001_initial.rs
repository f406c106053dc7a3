//! v001 -- Initial schema creation.
//!
//! Creates the user and rank tables: `users`, `ranks` and the `user_ranks`
//! join table.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Users
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS users (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    telegram_id     INTEGER UNIQUE,
    username        TEXT NOT NULL,
    gender          TEXT NOT NULL DEFAULT 'unset',   -- male | female | other | unset
    activity_points INTEGER NOT NULL DEFAULT 0 CHECK (activity_points >= 0),
    rank            TEXT NOT NULL DEFAULT 'Чебоксарец',
    is_online       INTEGER NOT NULL DEFAULT 0,      -- boolean 0/1
    last_seen       TEXT,                            -- ISO-8601 / RFC-3339
    created_at      TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Ranks (system tiers and admin-created custom ranks)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS ranks (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT,
    is_system   INTEGER NOT NULL DEFAULT 0,          -- boolean 0/1
    level       INTEGER NOT NULL DEFAULT 0,          -- 0 for custom ranks
    gender      TEXT,                                -- top-tier qualifier only
    created_by  INTEGER,
    created_at  TEXT NOT NULL,

    FOREIGN KEY (created_by) REFERENCES users(id) ON DELETE SET NULL
);

-- ----------------------------------------------------------------
-- User <-> rank assignments
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS user_ranks (
    user_id     INTEGER NOT NULL,
    rank_id     INTEGER NOT NULL,
    is_active   INTEGER NOT NULL DEFAULT 0,          -- boolean 0/1
    assigned_by INTEGER,
    assigned_at TEXT NOT NULL,

    PRIMARY KEY (user_id, rank_id),
    FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE,
    FOREIGN KEY (rank_id) REFERENCES ranks(id) ON DELETE CASCADE,
    FOREIGN KEY (assigned_by) REFERENCES users(id) ON DELETE SET NULL
);

CREATE INDEX IF NOT EXISTS idx_user_ranks_user ON user_ranks(user_id, assigned_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
