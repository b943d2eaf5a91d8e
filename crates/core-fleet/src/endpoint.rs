//! Endpoint records: the management plane's view of one grid member.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Role an endpoint plays in the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointKind {
    /// A driver routes work between clients and nodes.
    Driver,
    /// A node executes work.
    Node,
    /// A peer driver connected to this driver.
    Peer,
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointKind::Driver => write!(f, "driver"),
            EndpointKind::Node => write!(f, "node"),
            EndpointKind::Peer => write!(f, "peer"),
        }
    }
}

impl std::str::FromStr for EndpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "driver" => Ok(EndpointKind::Driver),
            "node" => Ok(EndpointKind::Node),
            "peer" => Ok(EndpointKind::Peer),
            other => Err(format!("unknown endpoint kind '{other}'")),
        }
    }
}

/// Provisioning flags attached to an endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointFlags {
    /// Endpoint can provision slave nodes.
    #[serde(default)]
    pub master: bool,
    /// Endpoint was provisioned by a master.
    #[serde(default)]
    pub slave: bool,
    /// Endpoint runs in the same process as its driver.
    #[serde(default)]
    pub local: bool,
}

/// Flat metadata snapshot attached to an endpoint as heartbeats arrive
/// (operating system, core count, memory, versions, ...).
pub type SystemSnapshot = BTreeMap<String, String>;

/// Management info for one remote endpoint.
///
/// The uuid is the sole identity key: equality and hashing ignore every
/// other field, so a record can be updated in place (liveness flag, system
/// snapshot) without changing its identity. Ordering sorts by host first
/// and falls back to uuid so listings group endpoints by machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Unique identifier, assigned when the endpoint first joins the grid.
    pub uuid: String,
    /// Display host name.
    pub host: String,
    /// Resolved network address, refined once resolution succeeds.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Management port.
    pub port: u16,
    /// Role in the grid.
    pub kind: EndpointKind,
    /// Provisioning flags.
    #[serde(default)]
    pub flags: EndpointFlags,
    /// Whether the management channel uses TLS.
    #[serde(default)]
    pub secure: bool,
    /// Whether the endpoint currently accepts work.
    #[serde(default = "default_active")]
    pub active: bool,
    /// Last received system snapshot, if any.
    #[serde(default)]
    pub system: Option<SystemSnapshot>,
}

fn default_active() -> bool {
    true
}

impl EndpointInfo {
    /// Create a record for a freshly discovered endpoint.
    pub fn new(
        uuid: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        kind: EndpointKind,
    ) -> Self {
        Self {
            uuid: uuid.into(),
            host: host.into(),
            ip_address: None,
            port,
            kind,
            flags: EndpointFlags::default(),
            secure: false,
            active: true,
            system: None,
        }
    }

    /// Builder-style flag assignment.
    pub fn with_flags(mut self, flags: EndpointFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Builder-style TLS marker.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Look up a metadata property by name.
    ///
    /// Built-in properties (`uuid`, `host`, `ip.address`, `port`, `kind`,
    /// `master`, `slave`, `local`, `secure`, `active`) come from the record
    /// itself; any other name is resolved against the system snapshot.
    pub fn property(&self, name: &str) -> Option<String> {
        match name {
            "uuid" => Some(self.uuid.clone()),
            "host" => Some(self.host.clone()),
            "ip.address" => self.ip_address.clone(),
            "port" => Some(self.port.to_string()),
            "kind" => Some(self.kind.to_string()),
            "master" => Some(self.flags.master.to_string()),
            "slave" => Some(self.flags.slave.to_string()),
            "local" => Some(self.flags.local.to_string()),
            "secure" => Some(self.secure.to_string()),
            "active" => Some(self.active.to_string()),
            other => self.system.as_ref().and_then(|s| s.get(other).cloned()),
        }
    }
}

impl PartialEq for EndpointInfo {
    fn eq(&self, other: &Self) -> bool {
        self.uuid == other.uuid
    }
}

impl Eq for EndpointInfo {}

impl Hash for EndpointInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.uuid.hash(state);
    }
}

impl PartialOrd for EndpointInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EndpointInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.host
            .cmp(&other.host)
            .then_with(|| self.uuid.cmp(&other.uuid))
    }
}

impl fmt::Display for EndpointInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{} ({})", self.kind, self.host, self.port, self.uuid)
    }
}
