//! CRUD operations for [`Rank`] and [`UserRank`] records.

use rusqlite::{params, OptionalExtension};

use community_shared::rank::SeedRank;
use community_shared::{RankId, UserId};

use crate::database::{now_timestamp, parse_gender, parse_timestamp, Database};
use crate::error::{Result, StoreError};
use crate::models::{HeldRank, NewRank, Rank, UserRank};

const RANK_COLUMNS: &str =
    "r.id, r.name, r.description, r.is_system, r.level, r.gender, r.created_by, r.created_at";

impl Database {
    // ------------------------------------------------------------------
    // Ranks
    // ------------------------------------------------------------------

    /// Insert the system ranks that are not present yet (matched by name).
    /// Returns the number of rows inserted.
    pub fn seed_system_ranks(&self, seeds: &[SeedRank]) -> Result<usize> {
        let now = now_timestamp();
        let mut inserted = 0;

        for seed in seeds {
            inserted += self.conn().execute(
                "INSERT OR IGNORE INTO ranks
                    (name, description, is_system, level, gender, created_at)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5)",
                params![
                    seed.name,
                    seed.description,
                    seed.level,
                    seed.gender.map(|g| g.as_str()),
                    now,
                ],
            )?;
        }

        if inserted > 0 {
            tracing::info!(inserted, "seeded system ranks");
        }
        Ok(inserted)
    }

    /// Create a custom (non-system) rank.
    pub fn create_rank(&self, new: &NewRank, created_by: Option<UserId>) -> Result<Rank> {
        self.conn().execute(
            "INSERT INTO ranks (name, description, is_system, level, gender, created_by, created_at)
             VALUES (?1, ?2, 0, 0, NULL, ?3, ?4)",
            params![
                new.name,
                new.description,
                created_by.map(|u| u.0),
                now_timestamp(),
            ],
        )?;

        self.get_rank(RankId(self.conn().last_insert_rowid()))
    }

    pub fn get_rank(&self, id: RankId) -> Result<Rank> {
        self.conn()
            .query_row(
                &format!("SELECT {RANK_COLUMNS} FROM ranks r WHERE r.id = ?1"),
                params![id.0],
                row_to_rank,
            )
            .map_err(StoreError::from_query)
    }

    pub fn find_rank_by_name(&self, name: &str) -> Result<Option<Rank>> {
        Ok(self
            .conn()
            .query_row(
                &format!("SELECT {RANK_COLUMNS} FROM ranks r WHERE r.name = ?1"),
                params![name],
                row_to_rank,
            )
            .optional()?)
    }

    /// All ranks, system tiers first (by level), then custom ranks by name.
    pub fn list_ranks(&self) -> Result<Vec<Rank>> {
        self.query_ranks(&format!(
            "SELECT {RANK_COLUMNS} FROM ranks r
             ORDER BY r.is_system DESC, r.level ASC, r.name ASC"
        ))
    }

    pub fn list_system_ranks(&self) -> Result<Vec<Rank>> {
        self.query_ranks(&format!(
            "SELECT {RANK_COLUMNS} FROM ranks r
             WHERE r.is_system = 1
             ORDER BY r.level ASC, r.name ASC"
        ))
    }

    fn query_ranks(&self, sql: &str) -> Result<Vec<Rank>> {
        let mut stmt = self.conn().prepare(sql)?;
        let rows = stmt.query_map([], row_to_rank)?;

        let mut ranks = Vec::new();
        for row in rows {
            ranks.push(row?);
        }
        Ok(ranks)
    }

    // ------------------------------------------------------------------
    // User ranks
    // ------------------------------------------------------------------

    pub fn count_user_ranks(&self, user_id: UserId) -> Result<usize> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM user_ranks WHERE user_id = ?1",
            params![user_id.0],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn get_user_rank(&self, user_id: UserId, rank_id: RankId) -> Result<Option<UserRank>> {
        Ok(self
            .conn()
            .query_row(
                "SELECT user_id, rank_id, is_active, assigned_by, assigned_at
                 FROM user_ranks WHERE user_id = ?1 AND rank_id = ?2",
                params![user_id.0, rank_id.0],
                row_to_user_rank,
            )
            .optional()?)
    }

    /// Insert an assignment, or update `is_active`/`assigned_by` in place if
    /// the pair already exists. `assigned_at` is refreshed either way.
    pub fn upsert_user_rank(
        &self,
        user_id: UserId,
        rank_id: RankId,
        is_active: bool,
        assigned_by: Option<UserId>,
    ) -> Result<UserRank> {
        self.conn().execute(
            "INSERT INTO user_ranks (user_id, rank_id, is_active, assigned_by, assigned_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id, rank_id) DO UPDATE SET
                is_active = excluded.is_active,
                assigned_by = excluded.assigned_by,
                assigned_at = excluded.assigned_at",
            params![
                user_id.0,
                rank_id.0,
                is_active,
                assigned_by.map(|u| u.0),
                now_timestamp(),
            ],
        )?;

        self.get_user_rank(user_id, rank_id)?
            .ok_or(StoreError::NotFound)
    }

    /// Delete an assignment. Returns `true` if a row was deleted.
    pub fn delete_user_rank(&self, user_id: UserId, rank_id: RankId) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM user_ranks WHERE user_id = ?1 AND rank_id = ?2",
            params![user_id.0, rank_id.0],
        )?;
        Ok(affected > 0)
    }

    /// Ranks held by a user, most recently assigned first.
    pub fn list_user_ranks(&self, user_id: UserId) -> Result<Vec<HeldRank>> {
        let mut stmt = self.conn().prepare(&format!(
            "SELECT {RANK_COLUMNS}, ur.is_active, ur.assigned_by, ur.assigned_at
             FROM user_ranks ur
             JOIN ranks r ON r.id = ur.rank_id
             WHERE ur.user_id = ?1
             ORDER BY ur.assigned_at DESC, ur.rank_id DESC"
        ))?;

        let rows = stmt.query_map(params![user_id.0], |row| {
            let assigned_at: String = row.get(10)?;
            Ok(HeldRank {
                rank: row_to_rank(row)?,
                is_active: row.get(8)?,
                assigned_by: row.get::<_, Option<i64>>(9)?.map(UserId),
                assigned_at: parse_timestamp(10, &assigned_at)?,
            })
        })?;

        let mut held = Vec::new();
        for row in rows {
            held.push(row?);
        }
        Ok(held)
    }

    /// The most recently assigned active custom rank: the user's pin.
    pub fn pinned_rank(&self, user_id: UserId) -> Result<Option<Rank>> {
        self.latest_active_rank_where(user_id, "AND r.is_system = 0")
    }

    /// The most recently assigned active rank of any kind.
    pub fn latest_active_rank(&self, user_id: UserId) -> Result<Option<Rank>> {
        self.latest_active_rank_where(user_id, "")
    }

    fn latest_active_rank_where(&self, user_id: UserId, filter: &str) -> Result<Option<Rank>> {
        Ok(self
            .conn()
            .query_row(
                &format!(
                    "SELECT {RANK_COLUMNS}
                     FROM user_ranks ur
                     JOIN ranks r ON r.id = ur.rank_id
                     WHERE ur.user_id = ?1 AND ur.is_active = 1 {filter}
                     ORDER BY ur.assigned_at DESC, ur.rank_id DESC
                     LIMIT 1"
                ),
                params![user_id.0],
                row_to_rank,
            )
            .optional()?)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Map a row selected with [`RANK_COLUMNS`] (at offset 0) to a [`Rank`].
fn row_to_rank(row: &rusqlite::Row<'_>) -> rusqlite::Result<Rank> {
    let gender: Option<String> = row.get(5)?;
    let created_at: String = row.get(7)?;

    Ok(Rank {
        id: RankId(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        is_system: row.get(3)?,
        level: row.get(4)?,
        gender: gender.map(|g| parse_gender(5, &g)).transpose()?,
        created_by: row.get::<_, Option<i64>>(6)?.map(UserId),
        created_at: parse_timestamp(7, &created_at)?,
    })
}

fn row_to_user_rank(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRank> {
    let assigned_at: String = row.get(4)?;

    Ok(UserRank {
        user_id: UserId(row.get(0)?),
        rank_id: RankId(row.get(1)?),
        is_active: row.get(2)?,
        assigned_by: row.get::<_, Option<i64>>(3)?.map(UserId),
        assigned_at: parse_timestamp(4, &assigned_at)?,
    })
}

#[cfg(test)]
mod tests {
    use community_shared::rank::SYSTEM_RANKS;
    use community_shared::Gender;

    use super::*;
    use crate::models::NewUser;

    fn setup() -> (Database, UserId) {
        let db = Database::open_in_memory().unwrap();
        db.seed_system_ranks(&SYSTEM_RANKS).unwrap();
        let user = db
            .create_user(&NewUser {
                username: "dan".into(),
                gender: Gender::Male,
                telegram_id: Some(1001),
            })
            .unwrap();
        (db, user.id)
    }

    fn custom(db: &Database, name: &str) -> Rank {
        db.create_rank(
            &NewRank {
                name: name.into(),
                description: None,
            },
            None,
        )
        .unwrap()
    }

    #[test]
    fn seeding_is_idempotent() {
        let (db, _) = setup();
        assert_eq!(db.seed_system_ranks(&SYSTEM_RANKS).unwrap(), 0);

        let system = db.list_system_ranks().unwrap();
        assert_eq!(system.len(), SYSTEM_RANKS.len());
        let top: Vec<_> = system.iter().filter(|r| r.level == 4).collect();
        assert_eq!(top.len(), 3);
        assert!(top.iter().all(|r| r.gender.is_some()));
        assert!(system[0].as_system_rank().is_some());
    }

    #[test]
    fn custom_rank_is_not_system() {
        let (db, _) = setup();
        let rank = custom(&db, "Модератор");
        assert!(!rank.is_system);
        assert_eq!(rank.level, 0);
        assert!(rank.as_system_rank().is_none());
        assert_eq!(db.find_rank_by_name("Модератор").unwrap(), Some(rank));
        assert_eq!(db.find_rank_by_name("nope").unwrap(), None);
    }

    #[test]
    fn upsert_updates_in_place() {
        let (db, user) = setup();
        let rank = custom(&db, "Ветеран");

        db.upsert_user_rank(user, rank.id, false, None).unwrap();
        let updated = db.upsert_user_rank(user, rank.id, true, Some(user)).unwrap();

        assert!(updated.is_active);
        assert_eq!(updated.assigned_by, Some(user));
        assert_eq!(db.count_user_ranks(user).unwrap(), 1);
    }

    #[test]
    fn pinned_rank_ignores_system_and_inactive() {
        let (db, user) = setup();
        let system = db.find_rank_by_name("42!").unwrap().unwrap();
        let inactive = custom(&db, "Спящий");

        db.upsert_user_rank(user, system.id, true, None).unwrap();
        db.upsert_user_rank(user, inactive.id, false, None).unwrap();
        assert_eq!(db.pinned_rank(user).unwrap(), None);
        assert_eq!(db.latest_active_rank(user).unwrap().unwrap().id, system.id);

        let pin = custom(&db, "Легенда");
        db.upsert_user_rank(user, pin.id, true, None).unwrap();
        assert_eq!(db.pinned_rank(user).unwrap().unwrap().id, pin.id);
    }

    #[test]
    fn delete_and_list_user_ranks() {
        let (db, user) = setup();
        let a = custom(&db, "A");
        let b = custom(&db, "B");
        db.upsert_user_rank(user, a.id, true, None).unwrap();
        db.upsert_user_rank(user, b.id, false, None).unwrap();

        assert_eq!(db.list_user_ranks(user).unwrap().len(), 2);
        assert!(db.delete_user_rank(user, a.id).unwrap());
        assert!(!db.delete_user_rank(user, a.id).unwrap());

        let held = db.list_user_ranks(user).unwrap();
        assert_eq!(held.len(), 1);
        assert_eq!(held[0].rank.name, "B");
        assert!(!held[0].is_active);
    }
}
