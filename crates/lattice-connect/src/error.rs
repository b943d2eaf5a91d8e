//! Error types for the lattice-connect crate

use lattice_mgmt::BeanError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("channel not connected")]
    NotConnected,

    #[error("channel closed")]
    Closed,

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("remote error: {0}")]
    Remote(String),

    #[error(transparent)]
    Bean(#[from] BeanError),

    #[error("endpoint not found: {0}")]
    EndpointNotFound(String),
}

impl ChannelError {
    /// Whether a gRPC status indicates the transport itself failed, as
    /// opposed to the remote bean reporting an application error.
    pub fn is_transport_status(status: &tonic::Status) -> bool {
        matches!(
            status.code(),
            tonic::Code::Unavailable | tonic::Code::DeadlineExceeded | tonic::Code::Cancelled
        )
    }
}
