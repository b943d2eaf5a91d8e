//! Lattice Connect: client-side management channels
//!
//! This crate is the control plane's client half: it connects a driver to
//! the management endpoints of its fleet and routes bean calls over those
//! connections.
//!
//! # Architecture
//!
//! - **MgmtChannel**: lazily connecting channel with a background attempt
//!   loop, lifecycle listeners and a notification pump
//! - **InvocationDispatcher**: attribute reads/writes and operation calls
//!   over one channel, with a consistent not-connected and transport-failure
//!   policy
//! - **BeanProxy**: call-site front end routing method shapes through the
//!   shared classification cache
//! - **TopologyManager / FleetForwarder**: the fleet registry and selector
//!   driven fan-out of admin actions
//!
//! # Example
//!
//! ```rust,no_run
//! use lattice_connect::{ChannelInfo, InvocationDispatcher, MgmtChannel, MgmtContext};
//! use lattice_mgmt::MgmtConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), lattice_connect::ChannelError> {
//! let info = ChannelInfo::remote("lattice", "10.0.0.5", 11198);
//! let channel = MgmtChannel::remote(info, MgmtConfig::default());
//!
//! if channel.connect_and_wait(Duration::from_secs(2)).await {
//!     let context = Arc::new(MgmtContext::new());
//!     let dispatcher = InvocationDispatcher::new(channel, context);
//!     let status = dispatcher
//!         .get_attribute("lattice:type=node,name=admin", "status")
//!         .await?;
//!     println!("{status:?}");
//! }
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod forwarder;
pub mod info;
pub mod proxy;
pub mod topology;

pub use channel::{
    ChannelListener, ChannelState, MgmtChannel, NotificationFilter, NotificationListener,
    SESSION_METADATA_KEY,
};
pub use context::MgmtContext;
pub use dispatch::{InvocationDispatcher, MethodKey, MethodKind, MethodShape};
pub use error::ChannelError;
pub use forwarder::{AdminAction, FleetForwarder, ForwardOutcome, ADMIN_BEAN};
pub use info::ChannelInfo;
pub use proxy::{BeanProxy, NotificationEmitter};
pub use topology::TopologyManager;
