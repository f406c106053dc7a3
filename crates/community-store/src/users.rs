//! CRUD operations for [`User`] records.

use rusqlite::params;

use community_shared::constants::DEFAULT_RANK_NAME;
use community_shared::UserId;

use crate::database::{
    now_timestamp, parse_gender, parse_optional_timestamp, parse_timestamp, Database,
};
use crate::error::{Result, StoreError};
use crate::models::{NewUser, User};

pub(crate) const USER_COLUMNS: &str =
    "id, telegram_id, username, gender, activity_points, rank, is_online, last_seen, created_at";

impl Database {
    /// Register a user with zero activity points and the default rank.
    pub fn create_user(&self, new: &NewUser) -> Result<User> {
        self.conn().execute(
            "INSERT INTO users (telegram_id, username, gender, activity_points, rank, created_at)
             VALUES (?1, ?2, ?3, 0, ?4, ?5)",
            params![
                new.telegram_id,
                new.username,
                new.gender.as_str(),
                DEFAULT_RANK_NAME,
                now_timestamp(),
            ],
        )?;

        self.get_user(UserId(self.conn().last_insert_rowid()))
    }

    pub fn get_user(&self, id: UserId) -> Result<User> {
        self.conn()
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id.0],
                row_to_user,
            )
            .map_err(StoreError::from_query)
    }

    /// Atomically add `delta` to the user's activity points and return the
    /// updated row.
    pub fn increment_activity_points(&self, id: UserId, delta: i64) -> Result<User> {
        self.conn()
            .query_row(
                &format!(
                    "UPDATE users SET activity_points = activity_points + ?1
                     WHERE id = ?2
                     RETURNING {USER_COLUMNS}"
                ),
                params![delta, id.0],
                row_to_user,
            )
            .map_err(StoreError::from_query)
    }

    /// Overwrite the displayed rank name.
    pub fn set_user_rank(&self, id: UserId, rank: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET rank = ?1 WHERE id = ?2",
            params![rank, id.0],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Record a presence change and stamp `last_seen`.
    pub fn set_user_online(&self, id: UserId, online: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET is_online = ?1, last_seen = ?2 WHERE id = ?3",
            params![online, now_timestamp(), id.0],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// Map a `rusqlite::Row` selected with [`USER_COLUMNS`] to a [`User`].
pub(crate) fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let gender: String = row.get(3)?;
    let last_seen: Option<String> = row.get(7)?;
    let created_at: String = row.get(8)?;

    Ok(User {
        id: UserId(row.get(0)?),
        telegram_id: row.get(1)?,
        username: row.get(2)?,
        gender: parse_gender(3, &gender)?,
        activity_points: row.get(4)?,
        rank: row.get(5)?,
        is_online: row.get(6)?,
        last_seen: parse_optional_timestamp(7, last_seen)?,
        created_at: parse_timestamp(8, &created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use community_shared::Gender;

    use super::*;

    fn new_user(name: &str, gender: Gender) -> NewUser {
        NewUser {
            username: name.to_string(),
            gender,
            telegram_id: None,
        }
    }

    #[test]
    fn create_user_starts_at_default_rank() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(&new_user("alice", Gender::Female)).unwrap();

        assert_eq!(user.activity_points, 0);
        assert_eq!(user.rank, DEFAULT_RANK_NAME);
        assert_eq!(user.gender, Gender::Female);
        assert!(!user.is_online);
        assert_eq!(db.get_user(user.id).unwrap(), user);
    }

    #[test]
    fn increment_is_cumulative() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(&new_user("bob", Gender::Male)).unwrap();

        db.increment_activity_points(user.id, 10).unwrap();
        let updated = db.increment_activity_points(user.id, 15).unwrap();
        assert_eq!(updated.activity_points, 25);
    }

    #[test]
    fn increment_unknown_user_is_not_found() {
        let db = Database::open_in_memory().unwrap();
        let err = db.increment_activity_points(UserId(404), 5).unwrap_err();
        assert!(matches!(err, StoreError::NotFound));
    }

    #[test]
    fn presence_updates_last_seen() {
        let db = Database::open_in_memory().unwrap();
        let user = db.create_user(&new_user("carol", Gender::Other)).unwrap();

        db.set_user_online(user.id, true).unwrap();
        let online = db.get_user(user.id).unwrap();
        assert!(online.is_online);
        assert!(online.last_seen.is_some());

        db.set_user_online(user.id, false).unwrap();
        assert!(!db.get_user(user.id).unwrap().is_online);
    }

    #[test]
    fn set_rank_on_unknown_user_fails() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(
            db.set_user_rank(UserId(1), "42!"),
            Err(StoreError::NotFound)
        ));
    }
}
