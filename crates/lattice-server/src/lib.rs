//! Lattice Server: the management plane's server half.
//!
//! A node or driver embeds this crate to expose its bean registry to the
//! control plane:
//!
//! - **MgmtServer**: connector bootstrap; binds with port-retry under a
//!   process-wide lock and serves the management service until stopped
//! - **MgmtServiceImpl**: the gRPC service over a `BeanRegistry`, with
//!   handshake auth, per-session validation and a notification bridge
//! - **RequestForwarder**: the seam a driver fills in to fan incoming
//!   `Forward` calls out over its own fleet

pub mod bootstrap;
pub mod error;
pub mod forward;
pub mod service;

pub use bootstrap::{MgmtServer, ServerConfig};
pub use error::ServerError;
pub use forward::RequestForwarder;
pub use service::MgmtServiceImpl;
