//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network and session-health settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Fixed room roster settings.
    #[serde(default)]
    pub rooms: RoomsConfig,

    /// Chat journal settings.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Address-hashing and proxy-trust settings.
    #[serde(default)]
    pub identity: IdentityConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Network and per-connection health configuration for the session gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Seconds between health pings sent to each open connection.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,

    /// Consecutive missed pings before a connection is closed with
    /// `CONNECTION_TIMEOUT`.
    #[serde(default = "default_ping_max_missed")]
    pub ping_max_missed: u32,

    /// Seconds of inactivity before an idle, room-less principal is evicted.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: i64,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// Busy timeout for SQLite connections, in milliseconds.
    #[serde(default = "default_db_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    #[serde(default = "default_db_pool_max_size")]
    pub pool_max_size: u32,
}

/// The fixed room roster seeded at bootstrap.
#[derive(Debug, Clone, Deserialize)]
pub struct RoomsConfig {
    /// Number of rooms to seed (`Room 1` through `Room {count}`).
    #[serde(default = "default_room_count")]
    pub count: u32,

    /// Per-room capacity.
    #[serde(default = "default_room_capacity")]
    pub capacity: i64,

    /// System-wide cap on concurrently active room memberships before new
    /// joins enter the admission queue.
    #[serde(default = "default_system_capacity")]
    pub system_capacity: usize,
}

/// Message Journal settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatConfig {
    /// Default number of records a `chat-history` replay carries.
    #[serde(default = "default_chat_history_limit")]
    pub history_limit: u32,
}

/// Address-hashing configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IdentityConfig {
    /// Hex-encoded HMAC key used to hash client addresses into principal
    /// identities. Without one, a fresh key is generated at startup and
    /// principals are not recognized across restarts.
    #[serde(default)]
    pub hmac_key: Option<String>,

    /// Whether to trust the first `X-Forwarded-For` entry over the direct
    /// peer address. Only safe behind a reverse proxy that strips or
    /// overwrites client-supplied values of this header.
    #[serde(default)]
    pub trust_forwarded_for: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "studyhall_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    8080
}

fn default_ping_interval_secs() -> u64 {
    300
}

fn default_ping_max_missed() -> u32 {
    3
}

fn default_idle_timeout_secs() -> i64 {
    1_800
}

fn default_db_path() -> String {
    "studyhall.db".to_string()
}

fn default_db_busy_timeout_ms() -> u64 {
    5_000
}

fn default_db_pool_max_size() -> u32 {
    8
}

fn default_room_count() -> u32 {
    10
}

fn default_room_capacity() -> i64 {
    10
}

fn default_system_capacity() -> usize {
    100
}

fn default_chat_history_limit() -> u32 {
    50
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ping_interval_secs: default_ping_interval_secs(),
            ping_max_missed: default_ping_max_missed(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_db_busy_timeout_ms(),
            pool_max_size: default_db_pool_max_size(),
        }
    }
}

impl Default for RoomsConfig {
    fn default() -> Self {
        Self {
            count: default_room_count(),
            capacity: default_room_capacity(),
            system_capacity: default_system_capacity(),
        }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: default_chat_history_limit(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment variable value was invalid for the expected type.
    #[error("invalid environment variable {name}: {reason}")]
    InvalidEnvVar { name: &'static str, reason: String },

    /// Configuration value is outside the allowed range.
    #[error("invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

const MIN_DB_BUSY_TIMEOUT_MS: u64 = 1;
const MAX_DB_BUSY_TIMEOUT_MS: u64 = 60_000;
const MIN_DB_POOL_MAX_SIZE: u32 = 1;
const MAX_DB_POOL_MAX_SIZE: u32 = 64;
const MIN_CHAT_HISTORY_LIMIT: u32 = 1;
const MAX_CHAT_HISTORY_LIMIT: u32 = 200;

fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if !(MIN_DB_BUSY_TIMEOUT_MS..=MAX_DB_BUSY_TIMEOUT_MS).contains(&config.database.busy_timeout_ms)
    {
        return Err(ConfigError::InvalidValue {
            field: "database.busy_timeout_ms",
            reason: format!(
                "must be in range {MIN_DB_BUSY_TIMEOUT_MS}..={MAX_DB_BUSY_TIMEOUT_MS}, got {}",
                config.database.busy_timeout_ms
            ),
        });
    }

    if !(MIN_DB_POOL_MAX_SIZE..=MAX_DB_POOL_MAX_SIZE).contains(&config.database.pool_max_size) {
        return Err(ConfigError::InvalidValue {
            field: "database.pool_max_size",
            reason: format!(
                "must be in range {MIN_DB_POOL_MAX_SIZE}..={MAX_DB_POOL_MAX_SIZE}, got {}",
                config.database.pool_max_size
            ),
        });
    }

    if config.rooms.count == 0 {
        return Err(ConfigError::InvalidValue {
            field: "rooms.count",
            reason: "must be at least 1".to_string(),
        });
    }

    if config.rooms.capacity < 1 {
        return Err(ConfigError::InvalidValue {
            field: "rooms.capacity",
            reason: "must be at least 1".to_string(),
        });
    }

    if config.rooms.system_capacity == 0 {
        return Err(ConfigError::InvalidValue {
            field: "rooms.system_capacity",
            reason: "must be at least 1".to_string(),
        });
    }

    if !(MIN_CHAT_HISTORY_LIMIT..=MAX_CHAT_HISTORY_LIMIT).contains(&config.chat.history_limit) {
        return Err(ConfigError::InvalidValue {
            field: "chat.history_limit",
            reason: format!(
                "must be in range {MIN_CHAT_HISTORY_LIMIT}..={MAX_CHAT_HISTORY_LIMIT}, got {}",
                config.chat.history_limit
            ),
        });
    }

    if config.server.ping_max_missed == 0 {
        return Err(ConfigError::InvalidValue {
            field: "server.ping_max_missed",
            reason: "must be at least 1".to_string(),
        });
    }

    Ok(())
}

fn parse_env_var<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => {
            let parsed = raw.parse::<T>().map_err(|err| ConfigError::InvalidEnvVar {
                name,
                reason: err.to_string(),
            })?;
            Ok(Some(parsed))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnvVar {
            name,
            reason: "value is not valid unicode".to_string(),
        }),
    }
}

fn parse_env_bool(name: &'static str) -> Result<Option<bool>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => {
            let normalized = raw.trim().to_ascii_lowercase();
            let parsed = match normalized.as_str() {
                "1" | "true" | "yes" | "on" => Some(true),
                "0" | "false" | "no" | "off" => Some(false),
                _ => None,
            }
            .ok_or_else(|| ConfigError::InvalidEnvVar {
                name,
                reason: format!("expected one of [true,false,1,0,yes,no,on,off], got '{raw}'"),
            })?;
            Ok(Some(parsed))
        }
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidEnvVar {
            name,
            reason: "value is not valid unicode".to_string(),
        }),
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `STUDYHALL_HOST` overrides `server.host`
/// - `STUDYHALL_PORT` overrides `server.port`
/// - `STUDYHALL_PING_INTERVAL_SECS` overrides `server.ping_interval_secs`
/// - `STUDYHALL_PING_MAX_MISSED` overrides `server.ping_max_missed`
/// - `STUDYHALL_IDLE_TIMEOUT_SECS` overrides `server.idle_timeout_secs`
/// - `STUDYHALL_DB_PATH` overrides `database.path`
/// - `STUDYHALL_DB_BUSY_TIMEOUT_MS` overrides `database.busy_timeout_ms`
/// - `STUDYHALL_DB_POOL_MAX_SIZE` overrides `database.pool_max_size`
/// - `STUDYHALL_ROOM_COUNT` overrides `rooms.count`
/// - `STUDYHALL_ROOM_CAPACITY` overrides `rooms.capacity`
/// - `STUDYHALL_SYSTEM_CAPACITY` overrides `rooms.system_capacity`
/// - `STUDYHALL_CHAT_HISTORY_LIMIT` overrides `chat.history_limit`
/// - `STUDYHALL_HMAC_KEY` overrides `identity.hmac_key`
/// - `STUDYHALL_TRUST_FORWARDED_FOR` overrides `identity.trust_forwarded_for`
/// - `STUDYHALL_LOG_LEVEL` overrides `logging.level`
/// - `STUDYHALL_LOG_JSON` overrides `logging.json` (set to "true" to enable)
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    if let Some(host) = parse_env_var("STUDYHALL_HOST")? {
        config.server.host = host;
    }
    if let Some(port) = parse_env_var("STUDYHALL_PORT")? {
        config.server.port = port;
    }
    if let Some(interval) = parse_env_var("STUDYHALL_PING_INTERVAL_SECS")? {
        config.server.ping_interval_secs = interval;
    }
    if let Some(max_missed) = parse_env_var("STUDYHALL_PING_MAX_MISSED")? {
        config.server.ping_max_missed = max_missed;
    }
    if let Some(idle) = parse_env_var("STUDYHALL_IDLE_TIMEOUT_SECS")? {
        config.server.idle_timeout_secs = idle;
    }
    if let Some(db_path) = parse_env_var::<String>("STUDYHALL_DB_PATH")? {
        config.database.path = db_path;
    }
    if let Some(timeout) = parse_env_var("STUDYHALL_DB_BUSY_TIMEOUT_MS")? {
        config.database.busy_timeout_ms = timeout;
    }
    if let Some(max_size) = parse_env_var("STUDYHALL_DB_POOL_MAX_SIZE")? {
        config.database.pool_max_size = max_size;
    }
    if let Some(count) = parse_env_var("STUDYHALL_ROOM_COUNT")? {
        config.rooms.count = count;
    }
    if let Some(capacity) = parse_env_var("STUDYHALL_ROOM_CAPACITY")? {
        config.rooms.capacity = capacity;
    }
    if let Some(cap) = parse_env_var("STUDYHALL_SYSTEM_CAPACITY")? {
        config.rooms.system_capacity = cap;
    }
    if let Some(limit) = parse_env_var("STUDYHALL_CHAT_HISTORY_LIMIT")? {
        config.chat.history_limit = limit;
    }
    if let Some(key) = parse_env_var::<String>("STUDYHALL_HMAC_KEY")? {
        config.identity.hmac_key = Some(key);
    }
    if let Some(trust) = parse_env_bool("STUDYHALL_TRUST_FORWARDED_FOR")? {
        config.identity.trust_forwarded_for = trust;
    }
    if let Some(level) = parse_env_var::<String>("STUDYHALL_LOG_LEVEL")? {
        config.logging.level = level;
    }
    if let Some(json) = parse_env_bool("STUDYHALL_LOG_JSON")? {
        config.logging.json = json;
    }

    validate_config(&config)?;

    Ok(config)
}
