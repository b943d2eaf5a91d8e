//! Channel identity: where a management channel points.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of one management channel.
///
/// Immutable after construction, except that `ip_address` is refined once
/// address resolution succeeds during connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Management protocol identifier, e.g. `"lattice"`.
    pub protocol: String,
    /// Target host name.
    pub host: String,
    /// Resolved address, filled in once resolution succeeds.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Management port.
    pub port: u16,
    /// Whether the endpoint URL uses a TLS scheme.
    #[serde(default)]
    pub secure: bool,
    /// In-process channel: dials nothing, binds to a local registry.
    #[serde(default)]
    pub local: bool,
}

impl ChannelInfo {
    /// Identity of a remote channel.
    pub fn remote(protocol: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            host: host.into(),
            ip_address: None,
            port,
            secure: false,
            local: false,
        }
    }

    /// Identity of an in-process channel.
    pub fn local(protocol: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            host: "localhost".to_string(),
            ip_address: None,
            port: 0,
            secure: false,
            local: true,
        }
    }

    /// Builder-style TLS marker.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// The URL this channel dials.
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.host, self.port)
    }
}

impl fmt::Display for ChannelInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.local {
            write!(f, "{}:local", self.protocol)
        } else {
            write!(f, "{}://{}:{}", self.protocol, self.host, self.port)
        }
    }
}
