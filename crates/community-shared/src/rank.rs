//! System rank table and points → rank resolution.
//!
//! System ranks are grouped into tiers by `level`. Every tier below the top
//! holds exactly one rank with no gender qualifier; the top tier holds exactly
//! one rank per qualifying [`Gender`]. A user qualifies for a lower tier when
//! their activity points reach the tier threshold, and for the top tier only
//! when the rank's gender also matches theirs. The highest qualifying level
//! wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::TIER_THRESHOLDS;
use crate::error::RankTableError;
use crate::types::Gender;

/// A system rank as seen by the resolver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemRank {
    pub name: String,
    pub level: u8,
    /// Only set on the top tier.
    pub gender: Option<Gender>,
}

/// Static definition used to seed the `ranks` table at startup.
#[derive(Debug, Clone, Copy)]
pub struct SeedRank {
    pub name: &'static str,
    pub description: &'static str,
    pub level: u8,
    pub gender: Option<Gender>,
}

/// The system ranks shipped with the application.
pub const SYSTEM_RANKS: [SeedRank; 6] = [
    SeedRank {
        name: "Чебоксарец",
        description: "Стартовый ранг каждого участника",
        level: 1,
        gender: None,
    },
    SeedRank {
        name: "Чебоксарец +",
        description: "25 очков активности",
        level: 2,
        gender: None,
    },
    SeedRank {
        name: "Начинающий 42",
        description: "50 очков активности",
        level: 3,
        gender: None,
    },
    SeedRank {
        name: "42-БРАТУХА",
        description: "100 очков активности",
        level: 4,
        gender: Some(Gender::Male),
    },
    SeedRank {
        name: "42-СЕСТРУХА",
        description: "100 очков активности",
        level: 4,
        gender: Some(Gender::Female),
    },
    SeedRank {
        name: "42!",
        description: "100 очков активности",
        level: 4,
        gender: Some(Gender::Other),
    },
];

impl From<&SeedRank> for SystemRank {
    fn from(seed: &SeedRank) -> Self {
        Self {
            name: seed.name.to_string(),
            level: seed.level,
            gender: seed.gender,
        }
    }
}

#[derive(Debug, Clone)]
struct Tier {
    level: u8,
    min_points: i64,
    ranks: Vec<SystemRank>,
}

/// Validated, immutable system rank table.
#[derive(Debug, Clone)]
pub struct RankTable {
    /// Sorted by ascending level.
    tiers: Vec<Tier>,
}

impl RankTable {
    /// Build and validate a table from system ranks and per-level thresholds.
    pub fn new(ranks: Vec<SystemRank>, thresholds: &[(u8, i64)]) -> Result<Self, RankTableError> {
        if ranks.is_empty() {
            return Err(RankTableError::Empty);
        }

        let mut by_level: BTreeMap<u8, Vec<SystemRank>> = BTreeMap::new();
        for rank in ranks {
            by_level.entry(rank.level).or_default().push(rank);
        }

        let top_level = *by_level.keys().next_back().ok_or(RankTableError::Empty)?;
        let mut tiers = Vec::with_capacity(by_level.len());
        let mut previous_min: Option<i64> = None;

        for (level, ranks) in by_level {
            let min_points = thresholds
                .iter()
                .find(|(l, _)| *l == level)
                .map(|(_, points)| *points)
                .ok_or(RankTableError::MissingThreshold(level))?;

            match previous_min {
                None if min_points != 0 => return Err(RankTableError::BaseTierNotFree),
                Some(prev) if min_points <= prev => {
                    return Err(RankTableError::ThresholdOrder(level))
                }
                _ => {}
            }
            previous_min = Some(min_points);

            if level == top_level {
                validate_top_tier(&ranks)?;
            } else {
                if let Some(gendered) = ranks.iter().find(|r| r.gender.is_some()) {
                    return Err(RankTableError::GenderedLowerTier(gendered.name.clone()));
                }
                if ranks.len() != 1 {
                    return Err(RankTableError::DuplicateLowerTier {
                        level,
                        count: ranks.len(),
                    });
                }
            }

            tiers.push(Tier {
                level,
                min_points,
                ranks,
            });
        }

        Ok(Self { tiers })
    }

    /// Table built from [`SYSTEM_RANKS`] and [`TIER_THRESHOLDS`].
    pub fn builtin() -> Result<Self, RankTableError> {
        Self::new(
            SYSTEM_RANKS.iter().map(SystemRank::from).collect(),
            &TIER_THRESHOLDS,
        )
    }

    /// Resolve the rank a user with `points` and `gender` qualifies for.
    ///
    /// Returns `None` only when no tier qualifies, which cannot happen for
    /// non-negative points since the lowest tier starts at zero.
    pub fn resolve(&self, points: i64, gender: Gender) -> Option<&SystemRank> {
        let top_level = self.top_level();

        self.tiers
            .iter()
            .rev()
            .filter(|tier| points >= tier.min_points)
            .find_map(|tier| {
                if tier.level == top_level {
                    tier.ranks.iter().find(|r| r.gender == Some(gender))
                } else {
                    tier.ranks.first()
                }
            })
    }

    /// The level-1 rank every user starts with.
    pub fn base_rank(&self) -> &SystemRank {
        &self.tiers[0].ranks[0]
    }

    pub fn top_level(&self) -> u8 {
        self.tiers.last().map(|t| t.level).unwrap_or_default()
    }

    pub fn threshold(&self, level: u8) -> Option<i64> {
        self.tiers
            .iter()
            .find(|t| t.level == level)
            .map(|t| t.min_points)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.ranks().any(|r| r.name == name)
    }

    pub fn ranks(&self) -> impl Iterator<Item = &SystemRank> {
        self.tiers.iter().flat_map(|t| t.ranks.iter())
    }
}

fn validate_top_tier(ranks: &[SystemRank]) -> Result<(), RankTableError> {
    for rank in ranks {
        match rank.gender {
            None | Some(Gender::Unset) => {
                return Err(RankTableError::UngenderedTopTier(rank.name.clone()))
            }
            Some(_) => {}
        }
    }

    for gender in Gender::QUALIFYING {
        let count = ranks.iter().filter(|r| r.gender == Some(gender)).count();
        if count != 1 {
            return Err(RankTableError::TopTierGender { gender, count });
        }
    }

    Ok(())
}
