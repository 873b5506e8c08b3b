//! Server configuration loading.
//!
//! The config file is YAML with sections `accounts`, `services.{redis,
//! mediamtx}`, and `cameras`. Those sections exist for the sidecars (REST
//! auth, camera relay); the core consumes only the redis block and ignores
//! the rest. Path comes from the `PROP_CONFIG` environment variable, default
//! `./config.yaml`.
//!
//! A missing file is not an error -- LAN-only bring-up needs no credentials,
//! so the loader returns defaults and logs a warning. A file that exists but
//! does not parse is a fatal startup error.

use serde::Deserialize;
use std::path::Path;
use tracing::warn;

/// Environment variable overriding the config file path.
pub const CONFIG_PATH_ENV: &str = "PROP_CONFIG";

/// Default config file path.
pub const DEFAULT_CONFIG_PATH: &str = "./config.yaml";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Validated server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerConfig {
    pub redis: RedisConfig,
}

/// Connection details for the pub/sub sidecar channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisConfig {
    pub ip: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            ip: "127.0.0.1".to_owned(),
            port: 6379,
            username: None,
            password: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Raw YAML deserialization types (everything optional)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    services: Option<RawServices>,
    // Consumed by the REST adapter and camera relay, not the core.
    #[allow(dead_code)]
    accounts: Option<serde_yaml::Value>,
    #[allow(dead_code)]
    cameras: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawServices {
    redis: Option<RawRedis>,
    #[allow(dead_code)]
    mediamtx: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
struct RawRedis {
    ip: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load the config from `$PROP_CONFIG`, falling back to `./config.yaml`.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_owned());
    load_config_from_path(Path::new(&path))
}

/// Load the config from an explicit path; a missing file yields defaults.
pub fn load_config_from_path(path: &Path) -> Result<ServerConfig, ConfigError> {
    if !path.exists() {
        warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(ServerConfig::default());
    }
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&yaml)
}

/// Load the config from a YAML string.
pub fn load_config_from_str(yaml: &str) -> Result<ServerConfig, ConfigError> {
    let raw: RawConfig =
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let redis = match raw.services.and_then(|s| s.redis) {
        Some(r) => {
            let defaults = RedisConfig::default();
            RedisConfig {
                ip: r.ip.unwrap_or(defaults.ip),
                port: r.port.unwrap_or(defaults.port),
                username: r.username,
                password: r.password,
            }
        }
        None => RedisConfig::default(),
    };

    Ok(ServerConfig { redis })
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Runtime tunables
// ---------------------------------------------------------------------------

use std::time::Duration;

/// Session and transport tunables. These are operational constants, not
/// deployment configuration; `main` builds the defaults and tests override
/// individual fields.
#[derive(Debug, Clone)]
pub struct Tunables {
    /// TCP listen address for device connections.
    pub bind_addr: String,
    /// HEARTBEAT cadence.
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered heartbeats before the session closes.
    pub heartbeat_miss_limit: u32,
    /// Deadline for any ACK-bearing request.
    pub ack_timeout: Duration,
    /// Deadline for the handshake TIMESYNC ACK.
    pub sync_timeout: Duration,
    /// Deadline for the first (CONFIG) packet after accept.
    pub config_timeout: Duration,
    /// Cadence of re-anchoring TIMESYNC rounds.
    pub resync_interval: Duration,
    /// Largest packet the frame reader accepts.
    pub max_packet: usize,
    /// Rolling sample buffer capacity per sensor.
    pub sample_buffer_capacity: usize,
    /// Reject DATA samples whose projected time runs backwards.
    pub strict_timestamps: bool,
    /// Periodic SSDP burst cadence; `None` means startup/trigger-only.
    pub discovery_interval: Option<Duration>,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            bind_addr: "0.0.0.0:50000".to_owned(),
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_miss_limit: 2,
            ack_timeout: Duration::from_secs(2),
            sync_timeout: Duration::from_secs(3),
            config_timeout: Duration::from_secs(10),
            resync_interval: Duration::from_secs(600),
            max_packet: stand_protocol::MAX_PACKET_LEN,
            sample_buffer_capacity: 10_000,
            strict_timestamps: false,
            discovery_interval: None,
        }
    }
}
