//! Lattice Core Fleet: pure-logic fleet model
//!
//! # Overview
//!
//! This crate provides the value types the rest of the management plane uses
//! to describe and address a fleet of grid endpoints:
//!
//! - **Endpoint records**: host/port/uuid identity, driver/node/peer kind,
//!   master/slave/local flags, liveness and an attached system snapshot
//! - **Selectors**: immutable predicates addressing a subset of the fleet
//!   (all endpoints, an explicit uuid set, or a policy expression)
//! - **Policies**: serializable boolean expression trees evaluated against
//!   an endpoint's metadata snapshot
//!
//! # Key Principles
//!
//! This crate is **pure logic** with zero knowledge of:
//! - Network transports or RPC frameworks
//! - Connection lifecycles
//! - Application-specific bean semantics
//!
//! Selectors and policies are plain serializable values. They cross process
//! boundaries inside forward requests, so they must stay immutable and
//! side-effect free.

pub mod endpoint;
pub mod policy;
pub mod selector;

// Re-export main types for convenience
pub use endpoint::{EndpointFlags, EndpointInfo, EndpointKind, SystemSnapshot};
pub use policy::{Policy, PolicyError};
pub use selector::Selector;
