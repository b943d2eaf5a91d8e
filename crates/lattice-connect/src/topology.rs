//! TopologyManager: the driver's registry of fleet endpoints and their
//! channels.

use crate::channel::MgmtChannel;
use lattice_core_fleet::{EndpointInfo, Selector, SystemSnapshot};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

struct FleetEntry {
    info: EndpointInfo,
    channel: MgmtChannel,
}

/// Registry of known endpoints, keyed by uuid.
///
/// Records are updated in place as heartbeats arrive. Removing an endpoint
/// drops the channel reference; closing the channel is the caller's choice.
pub struct TopologyManager {
    fleet: RwLock<HashMap<String, FleetEntry>>,
}

impl TopologyManager {
    pub fn new() -> Self {
        Self {
            fleet: RwLock::new(HashMap::new()),
        }
    }

    /// Register or replace an endpoint and its channel.
    pub async fn register(&self, endpoint: EndpointInfo, channel: MgmtChannel) {
        info!(endpoint = %endpoint, "registering endpoint");
        let mut fleet = self.fleet.write().await;
        fleet.insert(
            endpoint.uuid.clone(),
            FleetEntry {
                info: endpoint,
                channel,
            },
        );
    }

    /// Remove an endpoint, returning its channel when it was known.
    pub async fn remove(&self, uuid: &str) -> Option<MgmtChannel> {
        info!(uuid, "removing endpoint");
        let mut fleet = self.fleet.write().await;
        fleet.remove(uuid).map(|entry| entry.channel)
    }

    /// Flip an endpoint's liveness flag in place.
    pub async fn mark_active(&self, uuid: &str, active: bool) -> bool {
        let mut fleet = self.fleet.write().await;
        match fleet.get_mut(uuid) {
            Some(entry) => {
                debug!(uuid, active, "updating endpoint liveness");
                entry.info.active = active;
                true
            }
            None => false,
        }
    }

    /// Attach or replace an endpoint's system snapshot in place.
    pub async fn attach_system(&self, uuid: &str, snapshot: SystemSnapshot) -> bool {
        let mut fleet = self.fleet.write().await;
        match fleet.get_mut(uuid) {
            Some(entry) => {
                entry.info.system = Some(snapshot);
                true
            }
            None => false,
        }
    }

    /// All known endpoints, sorted by host then uuid.
    pub async fn endpoints(&self) -> Vec<EndpointInfo> {
        let fleet = self.fleet.read().await;
        let mut endpoints: Vec<EndpointInfo> =
            fleet.values().map(|entry| entry.info.clone()).collect();
        endpoints.sort();
        endpoints
    }

    /// Endpoints matching a selector, sorted by host then uuid.
    pub async fn select(&self, selector: &Selector) -> Vec<EndpointInfo> {
        let fleet = self.fleet.read().await;
        let mut matched: Vec<EndpointInfo> = fleet
            .values()
            .filter(|entry| selector.matches(&entry.info))
            .map(|entry| entry.info.clone())
            .collect();
        matched.sort();
        matched
    }

    /// Matching endpoints together with their channels, for fan-out.
    pub(crate) async fn select_with_channels(
        &self,
        selector: &Selector,
    ) -> Vec<(EndpointInfo, MgmtChannel)> {
        let fleet = self.fleet.read().await;
        let mut matched: Vec<(EndpointInfo, MgmtChannel)> = fleet
            .values()
            .filter(|entry| selector.matches(&entry.info))
            .map(|entry| (entry.info.clone(), entry.channel.clone()))
            .collect();
        matched.sort_by(|a, b| a.0.cmp(&b.0));
        matched
    }

    /// The channel of one endpoint.
    pub async fn channel(&self, uuid: &str) -> Option<MgmtChannel> {
        let fleet = self.fleet.read().await;
        fleet.get(uuid).map(|entry| entry.channel.clone())
    }

    pub async fn len(&self) -> usize {
        self.fleet.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.fleet.read().await.is_empty()
    }
}

impl Default for TopologyManager {
    fn default() -> Self {
        Self::new()
    }
}
