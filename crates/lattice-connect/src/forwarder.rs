//! Fleet fan-out: apply one admin action across the endpoints a selector
//! addresses.

use crate::context::MgmtContext;
use crate::dispatch::InvocationDispatcher;
use crate::topology::TopologyManager;
use lattice_core_fleet::Selector;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Canonical name of the node admin bean every agent registers.
pub const ADMIN_BEAN: &str = "lattice:type=node,name=admin";

/// Administrative actions a driver fans out over its fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAction {
    Stop,
    Restart,
    Reconnect,
    ResetCounters,
}

impl AdminAction {
    /// Operation name on the node admin bean.
    pub fn operation(&self) -> &'static str {
        match self {
            AdminAction::Stop => "stop",
            AdminAction::Restart => "restart",
            AdminAction::Reconnect => "reconnect",
            AdminAction::ResetCounters => "resetCounters",
        }
    }
}

impl fmt::Display for AdminAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operation())
    }
}

/// Outcome of one endpoint's share of a fan-out.
#[derive(Debug, Clone, PartialEq)]
pub enum ForwardOutcome {
    /// The invocation completed; carries its (possibly absent) result.
    Success(Option<Value>),
    /// The invocation failed; carries the error text.
    Failure(String),
}

impl ForwardOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ForwardOutcome::Success(_))
    }
}

/// Applies admin actions across the fleet.
///
/// A failing endpoint is logged and recorded in the outcome map; it never
/// aborts the remaining endpoints.
pub struct FleetForwarder {
    topology: Arc<TopologyManager>,
    context: Arc<MgmtContext>,
}

impl FleetForwarder {
    pub fn new(topology: Arc<TopologyManager>, context: Arc<MgmtContext>) -> Self {
        Self { topology, context }
    }

    /// Fan an admin action out over every endpoint the selector matches.
    /// Returns the per-endpoint outcome map keyed by uuid.
    pub async fn apply(
        &self,
        selector: &Selector,
        action: AdminAction,
    ) -> BTreeMap<String, ForwardOutcome> {
        let targets = self.topology.select_with_channels(selector).await;
        debug!(action = %action, targets = targets.len(), "applying fleet action");

        let mut outcomes = BTreeMap::new();
        for (endpoint, channel) in targets {
            let dispatcher = InvocationDispatcher::new(channel, Arc::clone(&self.context));
            let outcome = match dispatcher
                .invoke(ADMIN_BEAN, action.operation(), Vec::new(), Vec::new())
                .await
            {
                Ok(value) => ForwardOutcome::Success(value),
                Err(e) => {
                    warn!(endpoint = %endpoint.uuid, action = %action, error = %e, "fleet action failed on endpoint");
                    ForwardOutcome::Failure(e.to_string())
                }
            };
            outcomes.insert(endpoint.uuid, outcome);
        }
        outcomes
    }
}
