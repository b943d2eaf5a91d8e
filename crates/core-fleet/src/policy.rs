//! Policy predicates: serializable boolean expression trees evaluated
//! against an endpoint's metadata snapshot.
//!
//! A policy is data, not code. The closed set of node kinds below is the
//! sandbox: there is no scripting engine to escape. Policies serialize to
//! JSON and travel inside forward requests unchanged.

use crate::endpoint::EndpointInfo;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while evaluating a policy.
#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("property '{0}' is not numeric: '{1}'")]
    NotNumeric(String, String),
}

/// A boolean expression over endpoint metadata.
///
/// # Example
/// ```
/// use lattice_core_fleet::{EndpointInfo, EndpointKind, Policy};
///
/// let policy = Policy::And(vec![
///     Policy::Equal {
///         property: "kind".to_string(),
///         value: "node".to_string(),
///     },
///     Policy::Not(Box::new(Policy::Equal {
///         property: "active".to_string(),
///         value: "false".to_string(),
///     })),
/// ]);
///
/// let endpoint = EndpointInfo::new("n1", "alpha", 11198, EndpointKind::Node);
/// assert!(policy.evaluate(&endpoint));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    /// Property equals the given string (missing property never matches).
    Equal { property: String, value: String },
    /// Property contains the given substring.
    Contains { property: String, value: String },
    /// Property parses as a number and is >= the given threshold.
    AtLeast { property: String, value: f64 },
    /// Negation.
    Not(Box<Policy>),
    /// Every child matches (vacuously true when empty).
    And(Vec<Policy>),
    /// At least one child matches (vacuously false when empty).
    Or(Vec<Policy>),
}

impl Policy {
    /// Evaluate this policy against one endpoint's metadata.
    ///
    /// Evaluation never fails: a missing property simply does not match,
    /// and a non-numeric property fails an `AtLeast` comparison. This keeps
    /// fleet-wide selection total even when endpoints report heterogeneous
    /// snapshots.
    pub fn evaluate(&self, endpoint: &EndpointInfo) -> bool {
        match self {
            Policy::Equal { property, value } => {
                endpoint.property(property).as_deref() == Some(value.as_str())
            }
            Policy::Contains { property, value } => endpoint
                .property(property)
                .map(|p| p.contains(value.as_str()))
                .unwrap_or(false),
            Policy::AtLeast { property, value } => endpoint
                .property(property)
                .and_then(|p| p.trim().parse::<f64>().ok())
                .map(|n| n >= *value)
                .unwrap_or(false),
            Policy::Not(inner) => !inner.evaluate(endpoint),
            Policy::And(children) => children.iter().all(|c| c.evaluate(endpoint)),
            Policy::Or(children) => children.iter().any(|c| c.evaluate(endpoint)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointKind, SystemSnapshot};

    fn endpoint() -> EndpointInfo {
        let mut e = EndpointInfo::new("n1", "alpha", 11_198, EndpointKind::Node);
        e.system = Some(SystemSnapshot::from([
            ("os.name".to_string(), "linux".to_string()),
            ("cores".to_string(), "8".to_string()),
        ]));
        e
    }

    #[test]
    fn test_equal_and_missing_property() {
        let e = endpoint();

        let hit = Policy::Equal {
            property: "os.name".to_string(),
            value: "linux".to_string(),
        };
        let miss = Policy::Equal {
            property: "no.such".to_string(),
            value: "linux".to_string(),
        };

        assert!(hit.evaluate(&e));
        assert!(!miss.evaluate(&e));
    }

    #[test]
    fn test_at_least_numeric() {
        let e = endpoint();

        let enough = Policy::AtLeast {
            property: "cores".to_string(),
            value: 4.0,
        };
        let too_many = Policy::AtLeast {
            property: "cores".to_string(),
            value: 16.0,
        };
        let not_numeric = Policy::AtLeast {
            property: "os.name".to_string(),
            value: 1.0,
        };

        assert!(enough.evaluate(&e));
        assert!(!too_many.evaluate(&e));
        assert!(!not_numeric.evaluate(&e));
    }

    #[test]
    fn test_compound_expressions() {
        let e = endpoint();

        let policy = Policy::And(vec![
            Policy::Contains {
                property: "host".to_string(),
                value: "alph".to_string(),
            },
            Policy::Or(vec![
                Policy::Equal {
                    property: "kind".to_string(),
                    value: "driver".to_string(),
                },
                Policy::Equal {
                    property: "kind".to_string(),
                    value: "node".to_string(),
                },
            ]),
            Policy::Not(Box::new(Policy::Equal {
                property: "active".to_string(),
                value: "false".to_string(),
            })),
        ]);

        assert!(policy.evaluate(&e));
    }

    #[test]
    fn test_vacuous_and_or() {
        let e = endpoint();
        assert!(Policy::And(vec![]).evaluate(&e));
        assert!(!Policy::Or(vec![]).evaluate(&e));
    }

    #[test]
    fn test_json_round_trip() {
        let policy = Policy::Or(vec![
            Policy::Equal {
                property: "kind".to_string(),
                value: "node".to_string(),
            },
            Policy::AtLeast {
                property: "cores".to_string(),
                value: 2.0,
            },
        ]);

        let json = serde_json::to_string(&policy).unwrap();
        let back: Policy = serde_json::from_str(&json).unwrap();
        assert_eq!(policy, back);
    }
}
