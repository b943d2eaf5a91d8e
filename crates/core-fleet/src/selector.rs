//! Selectors: immutable predicates addressing a subset of the fleet.

use crate::endpoint::EndpointInfo;
use crate::policy::Policy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Addresses a subset of fleet endpoints for a fanned-out operation.
///
/// Selectors are value objects: constructed once, passed by value into
/// fan-out calls, never mutated. They serialize to JSON so a driver can
/// forward them to its peers.
///
/// # Example
/// ```
/// use lattice_core_fleet::{EndpointInfo, EndpointKind, Selector};
///
/// let selector = Selector::uuids(["a", "b", "a"]);
/// let endpoint = EndpointInfo::new("a", "alpha", 11198, EndpointKind::Node);
/// assert!(selector.matches(&endpoint));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selector {
    /// Matches every endpoint regardless of content.
    All,
    /// Matches endpoints whose uuid belongs to the set. Duplicates collapse
    /// and order is irrelevant.
    Uuids(BTreeSet<String>),
    /// Matches endpoints whose metadata satisfies the policy.
    Policy(Policy),
}

impl Selector {
    /// Build a uuid selector from any iterable of identifiers.
    pub fn uuids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Selector::Uuids(ids.into_iter().map(Into::into).collect())
    }

    /// Whether this selector matches the given endpoint.
    pub fn matches(&self, endpoint: &EndpointInfo) -> bool {
        match self {
            Selector::All => true,
            Selector::Uuids(set) => set.contains(&endpoint.uuid),
            Selector::Policy(policy) => policy.evaluate(endpoint),
        }
    }

    /// Filter a slice of endpoints down to the matching subset.
    pub fn select<'a>(&self, endpoints: &'a [EndpointInfo]) -> Vec<&'a EndpointInfo> {
        endpoints.iter().filter(|e| self.matches(e)).collect()
    }
}

impl Default for Selector {
    fn default() -> Self {
        Selector::All
    }
}
