//! Lattice Mgmt: the bean model shared by clients and servers
//!
//! This crate defines the management-plane vocabulary both sides of a
//! channel speak:
//!
//! - **BeanName**: structured names (`domain:key=value,...`) with a
//!   canonical property order
//! - **ManagedBean**: the async trait a managed object implements
//!   (attributes, operations, self-description)
//! - **BeanRegistry**: in-process name-to-bean map with a broadcast
//!   notification bus
//! - **ValueCodec**: the pluggable value serialization seam (JSON default)
//! - **MgmtConfig**: recognized configuration keys with TOML and
//!   environment sources
//!
//! Everything here is transport-free. The gRPC surface lives in
//! `lattice-proto`, the connection machinery in `lattice-connect` and
//! `lattice-server`.

pub mod bean;
pub mod codec;
pub mod config;
pub mod error;
pub mod name;
pub mod registry;

pub use bean::{AttributeDescriptor, BeanDescriptor, ManagedBean, OperationDescriptor};
pub use codec::{JsonCodec, ValueCodec};
pub use config::{ConfigSource, EnvSource, MgmtConfig, TomlSource, DEFAULT_PORT, DEFAULT_PROTOCOL};
pub use error::BeanError;
pub use name::BeanName;
pub use registry::{BeanRegistry, Notification};
