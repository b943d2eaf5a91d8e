//! Forwarding seam: lets a driver-side server fan incoming invocations out
//! over its own fleet.

use async_trait::async_trait;
use lattice_core_fleet::Selector;
use lattice_proto::{EndpointOutcome, InvokeRequest};
use tonic::Status;

/// Fans one invocation out over the endpoints a selector addresses.
///
/// Installed on driver servers only. Node servers leave the slot empty and
/// answer `Forward` with an unimplemented status. Implementations report
/// per-endpoint failures inside their outcome records; a `Status` error is
/// reserved for failures of the fan-out itself.
#[async_trait]
pub trait RequestForwarder: Send + Sync {
    async fn forward(
        &self,
        selector: Selector,
        invoke: InvokeRequest,
    ) -> Result<Vec<EndpointOutcome>, Status>;
}
