//! Relay configuration
//!
//! Loaded once at startup from a JSON file and shared read-only with
//! every connection. Key names follow the established signaling config
//! format (`stunservers`, `turnservers`, `turnorigins`, `rooms.maxClients`).

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::ConfigError;

/// Default listen host
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default listen port
pub const DEFAULT_PORT: u16 = 8888;

/// Default Redis port
pub const DEFAULT_REDIS_PORT: u16 = 6379;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    /// Backplane connection. `None` runs a single-instance in-process bus.
    pub redis: Option<RedisConfig>,
    pub rooms: RoomsConfig,
    /// Sent verbatim to every client on connect
    pub stunservers: Vec<Value>,
    pub turnservers: Vec<TurnServerConfig>,
    /// Origins allowed to receive TURN credentials. Empty allows all.
    pub turnorigins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoomsConfig {
    /// Capacity limit per room. 0 disables the check.
    pub max_clients: usize,
}

/// Redis backplane connection settings
#[derive(Clone, Deserialize)]
pub struct RedisConfig {
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub tls: Option<RedisTls>,
}

fn default_redis_port() -> u16 {
    DEFAULT_REDIS_PORT
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RedisTls {
    /// Skip certificate verification
    pub insecure: bool,
}

impl RedisConfig {
    /// Build a redis connection URL.
    pub fn url(&self) -> String {
        let scheme = if self.tls.is_some() { "rediss" } else { "redis" };
        let auth = match &self.password {
            Some(password) => format!(":{password}@"),
            None => String::new(),
        };
        let fragment = match &self.tls {
            Some(tls) if tls.insecure => "/#insecure",
            _ => "",
        };
        format!("{scheme}://{auth}{}:{}{fragment}", self.host, self.port)
    }
}

// The password never shows up in logs.
impl fmt::Debug for RedisConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("tls", &self.tls)
            .finish()
    }
}

/// One TURN server entry
#[derive(Clone, Default, Deserialize)]
#[serde(default)]
pub struct TurnServerConfig {
    pub secret: Option<String>,
    /// Credential lifetime in seconds; absent or 0 means the default
    #[serde(deserialize_with = "lenient_secs")]
    pub expiry: Option<u64>,
    pub urls: Option<Urls>,
    /// Legacy single-url key, used when `urls` is absent
    pub url: Option<Urls>,
}

/// Accepts `3600` or `"3600"`. Text that is not a number counts as unset.
fn lenient_secs<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Secs {
        Number(u64),
        Text(String),
    }

    Ok(match Option::<Secs>::deserialize(deserializer)? {
        Some(Secs::Number(secs)) => Some(secs),
        Some(Secs::Text(text)) => text.trim().parse().ok(),
        None => None,
    })
}

impl TurnServerConfig {
    pub fn urls(&self) -> Option<&Urls> {
        self.urls.as_ref().or(self.url.as_ref())
    }
}

impl fmt::Debug for TurnServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TurnServerConfig")
            .field("secret", &self.secret.as_ref().map(|_| "[REDACTED]"))
            .field("expiry", &self.expiry)
            .field("urls", &self.urls())
            .finish()
    }
}

/// A url or list of urls, copied through to clients unchanged
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Urls {
    One(String),
    Many(Vec<String>),
}

impl Config {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json(&contents)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue("server.port must be non-zero".into()));
        }
        if let Some(redis) = &self.redis {
            if redis.host.is_empty() {
                return Err(ConfigError::InvalidValue("redis.host must be set".into()));
            }
        }
        Ok(())
    }
}
