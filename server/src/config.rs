use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::auth::config::AuthConfig;
use crate::engine::chat_engine::EngineConfig;
use crate::engine::event_bus::{DEFAULT_SHARD_BACKLOG, DEFAULT_SHARDS};
use crate::engine::user_session::DEFAULT_OUTBOUND_QUEUE;

/// Top-level server configuration, loaded from fennec.toml.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub server: ServerSection,
    pub database: DatabaseSection,
    pub auth: AuthSection,
    pub realtime: RealtimeSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub web_address: String,
    /// Origin allowed by CORS. Localhost origins allow any.
    pub public_url: String,
    /// Maximum accepted request body, in kilobytes.
    pub max_body_kb: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            web_address: "0.0.0.0:8080".into(),
            public_url: "http://localhost:8080".into(),
            max_body_kb: 64,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: "sqlite:fennec.db?mode=rwc".into(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub jwt_secret: String,
    pub session_expiry_hours: i64,
}

impl Default for AuthSection {
    fn default() -> Self {
        let defaults = AuthConfig::default();
        Self {
            jwt_secret: defaults.jwt_secret,
            session_expiry_hours: defaults.session_expiry_hours,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RealtimeSection {
    /// How often clients are told to heartbeat.
    pub heartbeat_interval_secs: u64,
    /// Silence after which a session is closed.
    pub heartbeat_timeout_secs: u64,
    pub session_queue_capacity: usize,
    pub dispatch_shards: usize,
    pub shard_backlog: usize,
}

impl Default for RealtimeSection {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 45,
            session_queue_capacity: DEFAULT_OUTBOUND_QUEUE,
            dispatch_shards: DEFAULT_SHARDS,
            shard_backlog: DEFAULT_SHARD_BACKLOG,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

impl ServerConfig {
    /// Load config from a TOML file. Falls back to defaults if the file doesn't exist.
    /// Environment variables override TOML values.
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let mut config = if Path::new(path).exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {path}"))?;
            Self::from_toml(&contents).with_context(|| format!("failed to parse config file {path}"))?
        } else {
            info!("No config file found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WEB_ADDRESS") {
            self.server.web_address = v;
        }
        if let Ok(v) = std::env::var("PUBLIC_URL") {
            self.server.public_url = v;
        }
        if let Ok(v) = std::env::var("DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("JWT_SECRET") {
            self.auth.jwt_secret = v;
        }
        if let Some(hours) = parse_env("SESSION_EXPIRY_HOURS") {
            self.auth.session_expiry_hours = hours;
        }
        if let Some(secs) = parse_env("HEARTBEAT_INTERVAL_SECS") {
            self.realtime.heartbeat_interval_secs = secs;
        }
        if let Some(secs) = parse_env("HEARTBEAT_TIMEOUT_SECS") {
            self.realtime.heartbeat_timeout_secs = secs;
        }
        if let Some(n) = parse_env("SESSION_QUEUE_CAPACITY") {
            self.realtime.session_queue_capacity = n;
        }
        if let Some(n) = parse_env("DISPATCH_SHARDS") {
            self.realtime.dispatch_shards = n;
        }
        if let Some(n) = parse_env("SHARD_BACKLOG") {
            self.realtime.shard_backlog = n;
        }
    }

    /// Convert into an AuthConfig for the auth layer.
    pub fn to_auth_config(&self) -> AuthConfig {
        AuthConfig {
            jwt_secret: self.auth.jwt_secret.clone(),
            session_expiry_hours: self.auth.session_expiry_hours,
        }
    }

    /// Convert into the realtime settings of the engine.
    pub fn to_engine_config(&self) -> EngineConfig {
        let interval = self.realtime.heartbeat_interval_secs.max(1);
        EngineConfig {
            heartbeat_interval: Duration::from_secs(interval),
            // A timeout shorter than the interval would reap healthy sessions.
            heartbeat_timeout: Duration::from_secs(self.realtime.heartbeat_timeout_secs.max(interval)),
            session_queue_capacity: self.realtime.session_queue_capacity,
            bus_shards: self.realtime.dispatch_shards,
            shard_backlog: self.realtime.shard_backlog,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.server.web_address, "0.0.0.0:8080");
        assert_eq!(config.database.url, "sqlite:fennec.db?mode=rwc");
        assert_eq!(config.auth.session_expiry_hours, 720);
        assert_eq!(config.realtime.heartbeat_interval_secs, 30);
        assert_eq!(config.realtime.session_queue_capacity, DEFAULT_OUTBOUND_QUEUE);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = ServerConfig::from_toml(
            r#"
            [database]
            url = "sqlite::memory:"

            [realtime]
            dispatch_shards = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.database.url, "sqlite::memory:");
        assert_eq!(config.realtime.dispatch_shards, 8);
        assert_eq!(config.realtime.shard_backlog, DEFAULT_SHARD_BACKLOG);
        assert_eq!(config.server.web_address, "0.0.0.0:8080");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        assert!(ServerConfig::from_toml("[realtime]\ndispatch_shards = \"many\"").is_err());
    }

    #[test]
    fn test_engine_config_clamps_timeout() {
        let config = ServerConfig::from_toml(
            r#"
            [realtime]
            heartbeat_interval_secs = 20
            heartbeat_timeout_secs = 5
            "#,
        )
        .unwrap();
        let engine = config.to_engine_config();
        assert_eq!(engine.heartbeat_interval, Duration::from_secs(20));
        assert_eq!(engine.heartbeat_timeout, Duration::from_secs(20));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = ServerConfig::load("/nonexistent/fennec.toml").unwrap();
        assert_eq!(config.server.max_body_kb, 64);
    }

    #[test]
    fn test_to_auth_config() {
        let config = ServerConfig::from_toml(
            r#"
            [auth]
            jwt_secret = "abc"
            session_expiry_hours = 3
            "#,
        )
        .unwrap();
        let auth = config.to_auth_config();
        assert_eq!(auth.jwt_secret, "abc");
        assert_eq!(auth.session_expiry_hours, 3);
    }
}
