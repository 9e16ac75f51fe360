//! Application settings and configuration structures.

use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure containing all application settings.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Server configuration (host, port)
    pub server: ServerSettings,

    /// Database configuration (PostgreSQL)
    pub database: DatabaseSettings,

    /// JWT verification settings
    pub jwt: JwtSettings,

    /// CORS configuration
    pub cors: CorsSettings,

    /// Chat WebSocket configuration
    pub websocket: WebSocketSettings,

    /// Rate limiting configuration
    pub rate_limit: RateLimitSettings,

    /// Current environment (development, staging, production)
    pub environment: String,

    /// Log output format ("pretty" or "json")
    pub log_format: String,
}

/// Server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Host address to bind to (e.g., "0.0.0.0")
    pub host: String,

    /// Port number to listen on
    pub port: u16,
}

/// PostgreSQL database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Database connection URL
    pub url: String,

    /// Maximum number of connections in the pool
    pub max_connections: u32,

    /// Minimum number of connections to maintain
    pub min_connections: u32,

    /// Connection acquire timeout in seconds
    pub acquire_timeout: u64,

    /// Apply embedded migrations on startup
    pub run_migrations: bool,
}

/// JWT verification configuration.
///
/// Tokens are issued by the external identity provider; this service only
/// verifies them.
#[derive(Debug, Clone, Deserialize)]
pub struct JwtSettings {
    /// Shared secret used to verify HS256 signatures
    pub secret: String,

    /// Expected `iss` claim, if any
    #[serde(default)]
    pub issuer: Option<String>,
}

/// CORS configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CorsSettings {
    /// Allowed origins (comma-separated in env)
    pub allowed_origins: Vec<String>,
}

/// Chat WebSocket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct WebSocketSettings {
    /// Maximum inbound message size in bytes (default: 64KB)
    pub max_message_size: usize,

    /// Idle read deadline in seconds, refreshed by any inbound frame (default: 60)
    pub pong_wait_secs: u64,

    /// Per-frame write deadline in seconds (default: 10)
    pub write_wait_secs: u64,

    /// Capacity of each connection's outbound queue (default: 256)
    pub outbound_queue_capacity: usize,

    /// Capacity of each room's event queue (default: 512)
    pub room_queue_capacity: usize,

    /// Consecutive dropped frames before a slow connection is closed (default: 8)
    pub max_consecutive_drops: u32,

    /// How long disconnect cleanup waits on a saturated room queue (default: 1000)
    pub unregister_timeout_ms: u64,
}

/// Rate limiting configuration for the WebSocket upgrade route.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    /// Connection attempts allowed per client per minute
    pub websocket_per_minute: u32,

    /// Extra attempts tolerated above the base limit
    pub burst: u32,
}

/// Minimum required length for JWT secret (256 bits = 32 bytes)
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

impl Settings {
    /// Load settings from environment variables and configuration files.
    ///
    /// The loading order is:
    /// 1. config/default.toml (base configuration)
    /// 2. config/{RUN_ENV}.toml (environment-specific overrides)
    /// 3. Environment variables (highest priority)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or parsed,
    /// or if JWT secret is too short.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let environment = std::env::var("RUN_ENV").unwrap_or_else(|_| "development".into());

        Config::builder()
            .set_default("environment", environment.clone())?
            .set_default("log_format", "pretty")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout", 30)?
            .set_default("database.run_migrations", true)?
            .set_default("cors.allowed_origins", vec!["http://localhost:3000"])?
            .set_default("websocket.max_message_size", 65536_i64)? // 64KB
            .set_default("websocket.pong_wait_secs", 60_i64)?
            .set_default("websocket.write_wait_secs", 10_i64)?
            .set_default("websocket.outbound_queue_capacity", 256_i64)?
            .set_default("websocket.room_queue_capacity", 512_i64)?
            .set_default("websocket.max_consecutive_drops", 8_i64)?
            .set_default("websocket.unregister_timeout_ms", 1000_i64)?
            .set_default("rate_limit.websocket_per_minute", 10_i64)?
            .set_default("rate_limit.burst", 5_i64)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", environment)).required(false))
            // APP__SERVER__PORT=3000 -> server.port = 3000
            .add_source(
                Environment::default()
                    .prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("server.host", std::env::var("SERVER_HOST").ok())?
            .set_override_option("server.port", std::env::var("SERVER_PORT").ok())?
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("jwt.secret", std::env::var("JWT_SECRET").ok())?
            .build()?
            .try_deserialize()
            .and_then(|settings: Self| settings.validate())
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.jwt.secret.len() < MIN_JWT_SECRET_LENGTH {
            return Err(ConfigError::Message(format!(
                "JWT secret must be at least {} characters. Current length: {}",
                MIN_JWT_SECRET_LENGTH,
                self.jwt.secret.len()
            )));
        }
        if self.websocket.outbound_queue_capacity == 0 || self.websocket.room_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "websocket queue capacities must be greater than zero".into(),
            ));
        }
        if self.websocket.pong_wait_secs == 0 {
            return Err(ConfigError::Message(
                "websocket.pong_wait_secs must be greater than zero".into(),
            ));
        }
        Ok(self)
    }

    /// Get the full server address as a string.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl WebSocketSettings {
    /// Idle read deadline.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    /// Keep-alive ping period, 9/10 of the idle read deadline.
    pub fn ping_period(&self) -> Duration {
        self.pong_wait() * 9 / 10
    }

    /// Write deadline for a single frame.
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }

    /// Upper bound on a best-effort unregister push during cleanup.
    pub fn unregister_timeout(&self) -> Duration {
        Duration::from_millis(self.unregister_timeout_ms)
    }
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            max_message_size: 65536,
            pong_wait_secs: 60,
            write_wait_secs: 10,
            outbound_queue_capacity: 256,
            room_queue_capacity: 512,
            max_consecutive_drops: 8,
            unregister_timeout_ms: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_secret(secret: &str) -> Settings {
        Settings {
            server: ServerSettings {
                host: "127.0.0.1".into(),
                port: 3000,
            },
            database: DatabaseSettings {
                url: "postgres://localhost/pawchat".into(),
                max_connections: 5,
                min_connections: 1,
                acquire_timeout: 5,
                run_migrations: false,
            },
            jwt: JwtSettings {
                secret: secret.into(),
                issuer: None,
            },
            cors: CorsSettings {
                allowed_origins: vec![],
            },
            websocket: WebSocketSettings::default(),
            rate_limit: RateLimitSettings {
                websocket_per_minute: 10,
                burst: 5,
            },
            environment: "test".into(),
            log_format: "pretty".into(),
        }
    }

    #[test]
    fn test_ping_period_is_nine_tenths_of_pong_wait() {
        let ws = WebSocketSettings::default();
        assert_eq!(ws.ping_period(), Duration::from_secs(54));
    }

    #[test]
    fn test_short_jwt_secret_is_rejected() {
        assert!(settings_with_secret("short").validate().is_err());
    }

    #[test]
    fn test_zero_queue_capacity_is_rejected() {
        let mut settings = settings_with_secret(&"x".repeat(MIN_JWT_SECRET_LENGTH));
        settings.websocket.outbound_queue_capacity = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_valid_settings_pass() {
        let settings = settings_with_secret(&"x".repeat(MIN_JWT_SECRET_LENGTH));
        assert_eq!(settings.server_addr(), "127.0.0.1:3000");
        assert!(settings.validate().is_ok());
    }
}
