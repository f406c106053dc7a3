use thiserror::Error;

use crate::types::Gender;

/// Rejections produced while decoding a client WebSocket frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Unknown frame type: {0}")]
    UnknownType(String),

    #[error("Field '{0}' must be an integer")]
    NotAnInteger(&'static str),

    #[error("Message content must be a non-empty string")]
    EmptyContent,

    #[error("Message content exceeds {max} characters")]
    ContentTooLong { max: usize },

    #[error("Binary frames are not supported")]
    Binary,
}

/// Problems found while validating the seeded system rank table.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RankTableError {
    #[error("System rank table is empty")]
    Empty,

    #[error("No threshold configured for rank level {0}")]
    MissingThreshold(u8),

    #[error("Threshold for level {0} is not above the level below it")]
    ThresholdOrder(u8),

    #[error("Lowest rank level must start at 0 points")]
    BaseTierNotFree,

    #[error("Rank '{0}' below the top tier carries a gender qualifier")]
    GenderedLowerTier(String),

    #[error("Level {level} has {count} ranks, expected exactly one")]
    DuplicateLowerTier { level: u8, count: usize },

    #[error("Top tier has {count} ranks for gender '{gender}', expected exactly one")]
    TopTierGender { gender: Gender, count: usize },

    #[error("Top-tier rank '{0}' has no gender qualifier")]
    UngenderedTopTier(String),
}
