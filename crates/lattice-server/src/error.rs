//! Server-side error types.

use thiserror::Error;

/// Errors raised while bootstrapping or running the management server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Every candidate port in the configured window was taken.
    #[error("no free port after {attempts} bind attempts (stopped at {port}): {source}")]
    PortsExhausted {
        attempts: u32,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// A bootstrap failure that is not a bind conflict. Aborts the
    /// port-retry loop immediately.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] tonic::transport::Error),

    #[error("server is already running on {0}")]
    AlreadyRunning(std::net::SocketAddr),
}
