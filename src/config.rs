//! CLI configuration: endpoint addresses and connection defaults, read
//! from a TOML file.

use anyhow::{Context, Result};
use lattice_core_fleet::EndpointKind;
use lattice_mgmt::DEFAULT_PORT;
use serde::Deserialize;
use std::path::Path;

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_kind() -> EndpointKind {
    EndpointKind::Node
}

/// One addressable endpoint from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointEntry {
    pub uuid: String,
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_kind")]
    pub kind: EndpointKind,
}

/// CLI settings.
///
/// ```toml
/// token = "secret"
/// timeout_secs = 5
///
/// [[endpoint]]
/// uuid = "node-1"
/// host = "10.0.0.5"
/// port = 11198
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    /// Auth token presented during every handshake.
    pub token: Option<String>,
    /// Bounded wait for each channel to connect.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default, rename = "endpoint")]
    pub endpoints: Vec<EndpointEntry>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            token: None,
            timeout_secs: default_timeout_secs(),
            endpoints: Vec::new(),
        }
    }
}

impl CliConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load `path`, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn endpoint(&self, uuid: &str) -> Option<&EndpointEntry> {
        self.endpoints.iter().find(|e| e.uuid == uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_full_config() {
        let text = r#"
token = "secret"
timeout_secs = 3

[[endpoint]]
uuid = "node-1"
host = "10.0.0.5"
port = 12000
kind = "node"

[[endpoint]]
uuid = "driver-1"
host = "10.0.0.1"
kind = "driver"
"#;
        let config: CliConfig = toml::from_str(text).unwrap();
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.timeout_secs, 3);
        assert_eq!(config.endpoints.len(), 2);
        assert_eq!(config.endpoints[0].port, 12000);
        assert_eq!(config.endpoints[1].port, DEFAULT_PORT);
        assert_eq!(config.endpoints[1].kind, EndpointKind::Driver);
        assert!(config.endpoint("node-1").is_some());
        assert!(config.endpoint("ghost").is_none());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let config = CliConfig::load_or_default(&path).unwrap();
        assert!(config.token.is_none());
        assert_eq!(config.timeout_secs, 5);
        assert!(config.endpoints.is_empty());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "token = [not toml").unwrap();
        assert!(CliConfig::load_or_default(&path).is_err());
    }
}
