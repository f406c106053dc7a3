/// Application name
pub const APP_NAME: &str = "42-коммьюнити";

/// Display rank every new user starts with (level 1 system rank)
pub const DEFAULT_RANK_NAME: &str = "Чебоксарец";

/// Maximum number of ranks (system or custom) a single user may hold
pub const MAX_RANKS_PER_USER: usize = 10;

/// Level of the gender-qualified top tier
pub const TOP_TIER_LEVEL: u8 = 4;

/// Minimum accumulated activity points per system rank level
pub const TIER_THRESHOLDS: [(u8, i64); 4] = [(1, 0), (2, 25), (3, 50), (4, 100)];

/// Default maximum chat message length in characters
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 4000;

/// Default HTTP API port (server)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Outbound frame queue depth per WebSocket connection
pub const OUTBOUND_QUEUE_SIZE: usize = 256;
