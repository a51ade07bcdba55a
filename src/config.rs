//! Configuration management for Gatekeeper.
//!
//! Settings come from serde defaults, then an optional YAML file, then the
//! process environment. The result is read once at startup and never
//! re-scanned.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::ffi::OsString;
use std::fmt::Display;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

use crate::error::{GatekeeperError, Result};

/// Environment variable prefix for per-token limits (`TOKEN_<name>=<limit>`).
pub const TOKEN_ENV_PREFIX: &str = "TOKEN_";

/// Main configuration for the Gatekeeper service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatekeeperConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Upper bound on handling a single request, in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// How long shutdown waits for in-flight requests, in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_request_timeout() -> u64 {
    15
}

fn default_shutdown_timeout() -> u64 {
    30
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Requests per second allowed for each client IP
    #[serde(default = "default_ip_limit")]
    pub ip_limit: u64,

    /// Limit applied to tokens registered without an explicit value
    #[serde(default = "default_token_limit")]
    pub token_default_limit: u64,

    /// How long an identity stays blocked after exceeding its limit
    #[serde(default = "default_block_duration")]
    pub block_duration_secs: u64,

    /// Upper bound on each store operation, in milliseconds
    #[serde(default = "default_store_timeout")]
    pub store_timeout_ms: u64,

    /// Registered tokens; `None` means "use `token_default_limit`"
    #[serde(default)]
    pub tokens: HashMap<String, Option<u64>>,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            ip_limit: default_ip_limit(),
            token_default_limit: default_token_limit(),
            block_duration_secs: default_block_duration(),
            store_timeout_ms: default_store_timeout(),
            tokens: HashMap::new(),
        }
    }
}

fn default_ip_limit() -> u64 {
    10
}

fn default_token_limit() -> u64 {
    100
}

fn default_block_duration() -> u64 {
    300
}

fn default_store_timeout() -> u64 {
    1000
}

impl RateLimitingConfig {
    /// Block duration as a `Duration`.
    pub fn block_duration(&self) -> Duration {
        Duration::from_secs(self.block_duration_secs)
    }

    /// Store timeout as a `Duration`.
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    /// Registered tokens with the default limit filled in.
    pub fn resolved_tokens(&self) -> HashMap<String, u64> {
        self.tokens
            .iter()
            .map(|(token, limit)| {
                (token.clone(), limit.unwrap_or(self.token_default_limit))
            })
            .collect()
    }
}

/// Which counter store backs the service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store; only correct for a single replica
    Memory,
    /// Shared Redis store
    #[default]
    Redis,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "redis" => Ok(StoreBackend::Redis),
            other => Err(format!("unknown store backend '{}'", other)),
        }
    }
}

impl std::fmt::Display for StoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreBackend::Memory => write!(f, "memory"),
            StoreBackend::Redis => write!(f, "redis"),
        }
    }
}

/// Counter store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,

    #[serde(default)]
    pub redis: RedisConfig,
}

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_host")]
    pub host: String,

    #[serde(default = "default_redis_port")]
    pub port: u16,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: default_redis_host(),
            port: default_redis_port(),
            password: None,
            db: 0,
        }
    }
}

fn default_redis_host() -> String {
    "localhost".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

impl GatekeeperConfig {
    /// Load configuration from an optional file and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_from(path, process_env())
    }

    /// Load configuration from an optional file and the given variables.
    pub fn load_from<I>(path: Option<&Path>, vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let vars: HashMap<String, String> = vars.into_iter().collect();
        config.apply_env(&vars)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading configuration file");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatekeeperError::Config(format!("Failed to parse configuration: {}", e)))
    }

    fn apply_env(&mut self, vars: &HashMap<String, String>) -> Result<()> {
        let server = &mut self.server;
        override_from(vars, "LISTEN_ADDR", &mut server.listen_addr)?;
        override_from(vars, "REQUEST_TIMEOUT_SECONDS", &mut server.request_timeout_secs)?;
        override_from(vars, "SHUTDOWN_TIMEOUT_SECONDS", &mut server.shutdown_timeout_secs)?;

        let limits = &mut self.rate_limiting;
        override_from(vars, "RATE_LIMIT_IP", &mut limits.ip_limit)?;
        override_from(vars, "RATE_LIMIT_TOKEN_DEFAULT", &mut limits.token_default_limit)?;
        override_from(vars, "BLOCK_DURATION_SECONDS", &mut limits.block_duration_secs)?;
        override_from(vars, "STORE_TIMEOUT_MS", &mut limits.store_timeout_ms)?;
        limits.tokens.extend(token_entries(vars));

        override_from(vars, "STORE_BACKEND", &mut self.store.backend)?;
        let redis = &mut self.store.redis;
        override_from(vars, "REDIS_HOST", &mut redis.host)?;
        override_from(vars, "REDIS_PORT", &mut redis.port)?;
        override_from(vars, "REDIS_DB", &mut redis.db)?;
        if let Some(password) = non_empty(vars, "REDIS_PASSWORD") {
            redis.password = Some(password.to_string());
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let bounds = [
            ("store_timeout_ms", self.rate_limiting.store_timeout_ms),
            ("request_timeout_secs", self.server.request_timeout_secs),
            ("shutdown_timeout_secs", self.server.shutdown_timeout_secs),
        ];
        for (name, value) in bounds {
            if value == 0 {
                return Err(GatekeeperError::Config(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Process environment, skipping entries that are not valid UTF-8.
fn process_env() -> impl Iterator<Item = (String, String)> {
    utf8_entries(std::env::vars_os())
}

fn utf8_entries<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter().filter_map(|(name, value)| {
        match (name.into_string(), value.into_string()) {
            (Ok(name), Ok(value)) => Some((name, value)),
            (Ok(name), Err(_)) => {
                warn!(variable = %name, "Ignoring environment variable with non-UTF-8 value");
                None
            }
            _ => None,
        }
    })
}

fn non_empty<'a>(vars: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Replace `slot` with the parsed value of `name`, if set and non-empty.
fn override_from<T>(vars: &HashMap<String, String>, name: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Display,
{
    if let Some(raw) = non_empty(vars, name) {
        *slot = raw
            .parse()
            .map_err(|e| GatekeeperError::Config(format!("invalid {}: {}", name, e)))?;
    }
    Ok(())
}

/// Collect `TOKEN_<name>=<limit>` entries. An empty value registers the token
/// with the default limit; an unparsable value is skipped.
pub fn token_entries(vars: &HashMap<String, String>) -> Vec<(String, Option<u64>)> {
    let mut entries = Vec::new();
    for (name, value) in vars {
        let Some(token) = name.strip_prefix(TOKEN_ENV_PREFIX) else {
            continue;
        };
        if token.is_empty() {
            continue;
        }

        let value = value.trim();
        if value.is_empty() {
            entries.push((token.to_string(), None));
            continue;
        }
        match value.parse::<u64>() {
            Ok(limit) => entries.push((token.to_string(), Some(limit))),
            Err(e) => warn!(variable = %name, error = %e, "Ignoring token with invalid limit"),
        }
    }
    entries
}
