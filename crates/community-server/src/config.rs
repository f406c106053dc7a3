//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use community_shared::constants::{DEFAULT_HTTP_PORT, DEFAULT_MAX_MESSAGE_LENGTH};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API and WebSocket endpoint.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory (see `Database::new`).
    pub database_path: Option<PathBuf>,

    /// Admin API bearer token. Required to access /api/admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Maximum chat message length in characters.
    /// Env: `MAX_MESSAGE_LENGTH`
    pub max_message_length: usize,

    /// Sustained HTTP requests per second per client IP.
    /// Env: `RATE_LIMIT_PER_SEC`
    pub http_rate: f64,

    /// HTTP burst capacity per client IP.
    /// Env: `RATE_LIMIT_BURST`
    pub http_burst: f64,

    /// Sustained chat messages per second per user.
    /// Env: `MESSAGE_RATE_PER_SEC`
    pub message_rate: f64,

    /// Chat message burst capacity per user.
    /// Env: `MESSAGE_BURST`
    pub message_burst: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            admin_token: None,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            http_rate: 10.0,
            http_burst: 30.0,
            message_rate: 2.0,
            message_burst: 10.0,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            parse_into(&mut config.http_addr, "HTTP_ADDR", &addr);
        }

        if let Some(path) = lookup("DATABASE_PATH") {
            if !path.is_empty() {
                config.database_path = Some(PathBuf::from(path));
            }
        }

        if let Some(token) = lookup("ADMIN_TOKEN") {
            if !token.is_empty() {
                config.admin_token = Some(token);
            }
        }

        if let Some(val) = lookup("MAX_MESSAGE_LENGTH") {
            parse_into(&mut config.max_message_length, "MAX_MESSAGE_LENGTH", &val);
        }

        if let Some(val) = lookup("RATE_LIMIT_PER_SEC") {
            parse_into(&mut config.http_rate, "RATE_LIMIT_PER_SEC", &val);
        }

        if let Some(val) = lookup("RATE_LIMIT_BURST") {
            parse_into(&mut config.http_burst, "RATE_LIMIT_BURST", &val);
        }

        if let Some(val) = lookup("MESSAGE_RATE_PER_SEC") {
            parse_into(&mut config.message_rate, "MESSAGE_RATE_PER_SEC", &val);
        }

        if let Some(val) = lookup("MESSAGE_BURST") {
            parse_into(&mut config.message_burst, "MESSAGE_BURST", &val);
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

/// Overwrite `slot` with the parsed value, or keep the default and warn.
fn parse_into<T: FromStr>(slot: &mut T, key: &str, value: &str) {
    match value.trim().parse::<T>() {
        Ok(parsed) => *slot = parsed,
        Err(_) => {
            tracing::warn!(key, value = %value, "Invalid configuration value, using default");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> ServerConfig {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert!(config.admin_token.is_none());
        assert!(config.database_path.is_none());
        assert_eq!(config.max_message_length, DEFAULT_MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("HTTP_ADDR", "127.0.0.1:9000"),
            ("DATABASE_PATH", "/tmp/c.db"),
            ("ADMIN_TOKEN", "secret"),
            ("MESSAGE_BURST", "3"),
        ]);
        assert_eq!(config.http_addr, ([127, 0, 0, 1], 9000).into());
        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/c.db")));
        assert_eq!(config.admin_token.as_deref(), Some("secret"));
        assert_eq!(config.message_burst, 3.0);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = load(&[
            ("HTTP_ADDR", "not-an-addr"),
            ("MAX_MESSAGE_LENGTH", "-5"),
            ("ADMIN_TOKEN", ""),
        ]);
        assert_eq!(config.http_addr, ([0, 0, 0, 0], 8080).into());
        assert_eq!(config.max_message_length, DEFAULT_MAX_MESSAGE_LENGTH);
        assert!(config.admin_token.is_none());
    }
}
