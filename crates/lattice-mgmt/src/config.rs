//! Management configuration: recognized keys, defaults and key-value
//! sources (TOML files, process environment).

use crate::error::BeanError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Default management port.
pub const DEFAULT_PORT: u16 = 11_198;

/// Default protocol identifier exchanged in the handshake.
pub const DEFAULT_PROTOCOL: &str = "lattice";

/// Default backoff between handshake attempts, in milliseconds.
pub const DEFAULT_ATTEMPT_BACKOFF_MS: u64 = 100;

/// Default per-RPC deadline, in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Management-plane configuration shared by channels and servers.
///
/// # Example
/// ```
/// use lattice_mgmt::MgmtConfig;
///
/// let config = MgmtConfig::default();
/// assert_eq!(config.protocol, "lattice");
/// assert!(config.connect_timeout().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MgmtConfig {
    /// Absolute connection timeout in milliseconds. Zero or negative means
    /// the attempt loop runs unbounded.
    #[serde(default)]
    pub connect_timeout_ms: i64,

    /// Per-RPC deadline in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Management protocol identifier.
    #[serde(default = "default_protocol")]
    pub protocol: String,

    /// Management port base.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether the channel identity uses TLS.
    #[serde(default)]
    pub tls: bool,

    /// Whether `reset()` schedules a fresh connection attempt.
    #[serde(default = "default_true")]
    pub reconnect_on_error: bool,

    /// Fixed backoff between handshake attempts, in milliseconds.
    #[serde(default = "default_attempt_backoff_ms")]
    pub attempt_backoff_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_MS
}

fn default_protocol() -> String {
    DEFAULT_PROTOCOL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_true() -> bool {
    true
}

fn default_attempt_backoff_ms() -> u64 {
    DEFAULT_ATTEMPT_BACKOFF_MS
}

impl Default for MgmtConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 0,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            protocol: DEFAULT_PROTOCOL.to_string(),
            port: DEFAULT_PORT,
            tls: false,
            reconnect_on_error: true,
            attempt_backoff_ms: DEFAULT_ATTEMPT_BACKOFF_MS,
        }
    }
}

impl MgmtConfig {
    /// Build a config from a key-value source, applying defaults for every
    /// missing key and failing on unparseable values.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, BeanError> {
        let mut config = MgmtConfig::default();

        if let Some(raw) = source.get("connect_timeout_ms") {
            config.connect_timeout_ms = parse_key("connect_timeout_ms", &raw)?;
        }
        if let Some(raw) = source.get("request_timeout_ms") {
            config.request_timeout_ms = parse_key("request_timeout_ms", &raw)?;
        }
        if let Some(raw) = source.get("protocol") {
            config.protocol = raw;
        }
        if let Some(raw) = source.get("port") {
            config.port = parse_key("port", &raw)?;
        }
        if let Some(raw) = source.get("tls") {
            config.tls = parse_key("tls", &raw)?;
        }
        if let Some(raw) = source.get("reconnect_on_error") {
            config.reconnect_on_error = parse_key("reconnect_on_error", &raw)?;
        }
        if let Some(raw) = source.get("attempt_backoff_ms") {
            config.attempt_backoff_ms = parse_key("attempt_backoff_ms", &raw)?;
        }

        Ok(config)
    }

    /// The absolute connection timeout, `None` when unbounded.
    pub fn connect_timeout(&self) -> Option<Duration> {
        if self.connect_timeout_ms <= 0 {
            None
        } else {
            Some(Duration::from_millis(self.connect_timeout_ms as u64))
        }
    }

    /// The per-RPC deadline.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Backoff between handshake attempts.
    pub fn attempt_backoff(&self) -> Duration {
        Duration::from_millis(self.attempt_backoff_ms)
    }
}

fn parse_key<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, BeanError> {
    raw.trim()
        .parse()
        .map_err(|_| BeanError::Config(format!("invalid value for '{key}': '{raw}'")))
}

/// A flat key-value configuration source.
pub trait ConfigSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Source backed by a flat TOML table.
///
/// Values may be strings, integers or booleans; nested tables are rejected
/// at load time.
pub struct TomlSource {
    values: BTreeMap<String, String>,
}

impl TomlSource {
    /// Load from a TOML file on disk.
    pub fn from_path(path: &Path) -> Result<Self, BeanError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| BeanError::Config(format!("cannot read {}: {e}", path.display())))?;
        Self::from_str(&text)
    }

    /// Parse from TOML text.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(text: &str) -> Result<Self, BeanError> {
        let table: toml::Table = text
            .parse()
            .map_err(|e| BeanError::Config(format!("invalid TOML: {e}")))?;

        let mut values = BTreeMap::new();
        for (key, value) in table {
            let flat = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Float(f) => f.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                other => {
                    return Err(BeanError::Config(format!(
                        "key '{key}' has unsupported type {}",
                        other.type_str()
                    )))
                }
            };
            values.insert(key, flat);
        }
        Ok(Self { values })
    }
}

impl ConfigSource for TomlSource {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

/// Source backed by the process environment.
///
/// Keys map to environment variables by upper-casing behind a prefix:
/// `connect_timeout_ms` with prefix `LATTICE` reads `LATTICE_CONNECT_TIMEOUT_MS`.
pub struct EnvSource {
    prefix: String,
}

impl EnvSource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EnvSource {
    fn default() -> Self {
        Self::new("LATTICE")
    }
}

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        let var = format!("{}_{}", self.prefix, key.to_uppercase());
        std::env::var(var).ok()
    }
}
