//! Activity points and rank progression.
//!
//! The engine owns the validated [`RankTable`] and applies it to user rows.
//! Every operation runs inside one store transaction, and callers hold the
//! shared database lock for its duration, so concurrent awards for the same
//! user are serialized.
//!
//! An active custom (non-system) rank assigned by an admin is a *pin*: while
//! it exists, activity awards still add points but leave the displayed rank
//! alone.

use serde::Serialize;
use tracing::{debug, info};

use community_shared::constants::{MAX_RANKS_PER_USER, TIER_THRESHOLDS};
use community_shared::rank::{RankTable, SystemRank, SYSTEM_RANKS};
use community_shared::{RankId, UserId};
use community_store::{Database, NewRank, Rank, User, UserRank};

use crate::error::ServerError;

/// Result of an activity award.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityOutcome {
    pub user_id: UserId,
    pub activity_points: i64,
    /// Displayed rank after the award.
    pub rank: String,
    pub rank_changed: bool,
    /// `true` when an admin pin kept the displayed rank from being updated.
    pub pinned: bool,
}

#[derive(Debug, Clone)]
pub struct RankEngine {
    table: RankTable,
}

impl RankEngine {
    pub fn new(table: RankTable) -> Self {
        Self { table }
    }

    /// Seed the system ranks, read them back and validate the table.
    pub fn load(db: &Database) -> Result<Self, ServerError> {
        db.seed_system_ranks(&SYSTEM_RANKS)?;

        let ranks: Vec<SystemRank> = db
            .list_system_ranks()?
            .iter()
            .filter_map(Rank::as_system_rank)
            .collect();

        let table = RankTable::new(ranks, &TIER_THRESHOLDS)
            .map_err(|e| ServerError::Internal(format!("Invalid system rank table: {e}")))?;

        info!(
            ranks = table.ranks().count(),
            top_level = table.top_level(),
            "System rank table loaded"
        );
        Ok(Self::new(table))
    }

    #[cfg(test)]
    pub fn table(&self) -> &RankTable {
        &self.table
    }

    /// Add `delta` activity points and refresh the displayed rank.
    pub fn add_activity_points(
        &self,
        db: &Database,
        user_id: UserId,
        delta: i64,
    ) -> Result<ActivityOutcome, ServerError> {
        if delta <= 0 {
            return Err(ServerError::BadRequest(
                "Points must be a positive integer".into(),
            ));
        }

        db.with_transaction(|db| {
            let user = db.increment_activity_points(user_id, delta)?;
            let pin = db.pinned_rank(user_id)?;

            let mut outcome = ActivityOutcome {
                user_id,
                activity_points: user.activity_points,
                rank: user.rank.clone(),
                rank_changed: false,
                pinned: pin.is_some(),
            };

            if let Some(pin) = pin {
                debug!(user = %user_id, pin = %pin.name, "Rank pinned, skipping resolution");
                return Ok(outcome);
            }

            if let Some(resolved) = self.table.resolve(user.activity_points, user.gender) {
                if resolved.name != user.rank {
                    db.set_user_rank(user_id, &resolved.name)?;
                    info!(
                        user = %user_id,
                        points = user.activity_points,
                        from = %user.rank,
                        to = %resolved.name,
                        "Rank changed"
                    );
                    outcome.rank = resolved.name.clone();
                    outcome.rank_changed = true;
                }
            }

            Ok(outcome)
        })
    }

    /// Create a custom rank that admins can assign.
    pub fn create_rank(
        &self,
        db: &Database,
        new: &NewRank,
        created_by: Option<UserId>,
    ) -> Result<Rank, ServerError> {
        let name = new.name.trim();
        if name.is_empty() {
            return Err(ServerError::BadRequest("Rank name must not be empty".into()));
        }

        db.with_transaction(|db| {
            if db.find_rank_by_name(name)?.is_some() {
                return Err(ServerError::Conflict(format!("Rank '{name}' already exists")));
            }
            let rank = db.create_rank(
                &NewRank {
                    name: name.to_string(),
                    description: new.description.clone(),
                },
                created_by,
            )?;
            info!(rank = %rank.name, id = %rank.id, "Custom rank created");
            Ok(rank)
        })
    }

    /// Give `rank_id` to a user, or update the existing assignment.
    ///
    /// An active assignment immediately becomes the displayed rank.
    pub fn assign_rank_to_user(
        &self,
        db: &Database,
        user_id: UserId,
        rank_id: RankId,
        assigned_by: Option<UserId>,
        is_active: bool,
    ) -> Result<UserRank, ServerError> {
        db.with_transaction(|db| {
            db.get_user(user_id)?;
            let rank = db.get_rank(rank_id)?;

            let already_held = db.get_user_rank(user_id, rank_id)?.is_some();
            if !already_held && db.count_user_ranks(user_id)? >= MAX_RANKS_PER_USER {
                return Err(ServerError::RankLimitExceeded);
            }

            let assignment = db.upsert_user_rank(user_id, rank_id, is_active, assigned_by)?;
            if is_active {
                db.set_user_rank(user_id, &rank.name)?;
            }

            info!(
                user = %user_id,
                rank = %rank.name,
                active = is_active,
                updated = already_held,
                "Rank assigned"
            );
            Ok(assignment)
        })
    }

    /// Take `rank_id` away from a user.
    ///
    /// When the removed rank was on display, the most recently assigned
    /// remaining active rank takes its place, or the base rank if none is
    /// left.
    pub fn remove_rank_from_user(
        &self,
        db: &Database,
        user_id: UserId,
        rank_id: RankId,
    ) -> Result<User, ServerError> {
        db.with_transaction(|db| {
            let user = db.get_user(user_id)?;
            let rank = db.get_rank(rank_id)?;

            if !db.delete_user_rank(user_id, rank_id)? {
                return Err(ServerError::NotFound(format!(
                    "User {user_id} does not hold rank {rank_id}"
                )));
            }

            if user.rank == rank.name {
                let replacement = match db.latest_active_rank(user_id)? {
                    Some(active) => active.name,
                    None => self.table.base_rank().name.clone(),
                };
                db.set_user_rank(user_id, &replacement)?;
                info!(
                    user = %user_id,
                    removed = %rank.name,
                    now = %replacement,
                    "Displayed rank removed"
                );
            } else {
                info!(user = %user_id, removed = %rank.name, "Rank removed");
            }

            Ok(db.get_user(user_id)?)
        })
    }
}
