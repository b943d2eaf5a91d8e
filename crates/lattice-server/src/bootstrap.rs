//! Connector bootstrap: bind with port-retry, serve, shut down.

use crate::error::ServerError;
use crate::forward::RequestForwarder;
use crate::service::MgmtServiceImpl;
use lattice_core_fleet::EndpointKind;
use lattice_mgmt::{BeanRegistry, DEFAULT_PORT, DEFAULT_PROTOCOL};
use lattice_proto::management_service_server::ManagementServiceServer;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::Server;
use tracing::{debug, info, warn};

/// Serializes bind attempts across the process so two servers starting at
/// the same preferred port race the kernel, not each other.
static BIND_LOCK: Mutex<()> = Mutex::const_new(());

/// Bootstrap settings for one management server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_host: String,
    /// Preferred port, tried first.
    pub port: u16,
    /// Upper bound on bind attempts before giving up.
    pub max_bind_attempts: u32,
    /// Lowest candidate port; the retry loop wraps back here after the
    /// ceiling.
    pub port_floor: u16,
    /// Highest candidate port.
    pub port_ceiling: u16,
    /// Protocol identifier clients must present during the handshake.
    pub protocol: String,
    /// Shared secret required from clients; `None` disables auth.
    pub auth_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_bind_attempts: 16,
            port_floor: DEFAULT_PORT,
            port_ceiling: DEFAULT_PORT + 100,
            protocol: DEFAULT_PROTOCOL.to_string(),
            auth_token: None,
        }
    }
}

struct Running {
    addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<Result<(), tonic::transport::Error>>,
}

/// The management server.
///
/// `start` binds under the process-wide bind lock, walking candidate ports
/// past conflicts, then serves the management service over the given
/// registry until `stop`. Stopping is idempotent.
pub struct MgmtServer {
    config: ServerConfig,
    kind: EndpointKind,
    forwarder: Mutex<Option<Arc<dyn RequestForwarder>>>,
    running: Mutex<Option<Running>>,
}

impl MgmtServer {
    pub fn new(config: ServerConfig, kind: EndpointKind) -> Self {
        Self {
            config,
            kind,
            forwarder: Mutex::new(None),
            running: Mutex::new(None),
        }
    }

    /// Forwarder to install when the server starts. Drivers only; node
    /// servers answer `Forward` with an unimplemented status.
    pub async fn set_forwarder(&self, forwarder: Arc<dyn RequestForwarder>) {
        *self.forwarder.lock().await = Some(forwarder);
    }

    /// Resolved listen address once the server is running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().await.as_ref().map(|r| r.addr)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Bind and serve the management service over `registry`. Returns the
    /// resolved listen address.
    pub async fn start(&self, registry: Arc<BeanRegistry>) -> Result<SocketAddr, ServerError> {
        let mut running = self.running.lock().await;
        if let Some(active) = running.as_ref() {
            return Err(ServerError::AlreadyRunning(active.addr));
        }

        let listener = self.bind_with_retry().await?;
        let addr = listener.local_addr()?;

        let service = MgmtServiceImpl::new(
            registry,
            self.config.protocol.clone(),
            self.config.auth_token.clone(),
            self.kind,
        );
        if let Some(forwarder) = self.forwarder.lock().await.clone() {
            service.install_forwarder(forwarder).await;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let incoming = TcpListenerStream::new(listener);
        let router =
            Server::builder().add_service(ManagementServiceServer::from_arc(Arc::new(service)));
        let task = tokio::spawn(async move {
            router
                .serve_with_incoming_shutdown(incoming, async {
                    let _ = shutdown_rx.await;
                })
                .await
        });

        info!(%addr, kind = %self.kind, "management server listening");
        *running = Some(Running {
            addr,
            shutdown_tx,
            task,
        });
        Ok(addr)
    }

    /// Stop serving. Safe to call repeatedly; later calls are no-ops.
    pub async fn stop(&self) {
        let active = self.running.lock().await.take();
        let Some(active) = active else {
            return;
        };

        info!(addr = %active.addr, "stopping management server");
        let _ = active.shutdown_tx.send(());
        match active.task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "serve task ended with error"),
            Err(e) => warn!(error = %e, "serve task panicked"),
        }
        *self.forwarder.lock().await = None;
    }

    async fn bind_with_retry(&self) -> Result<TcpListener, ServerError> {
        let _guard = BIND_LOCK.lock().await;

        let mut port = self.config.port;
        let mut last = None;
        for attempt in 1..=self.config.max_bind_attempts {
            let addr = format!("{}:{}", self.config.bind_host, port);
            match TcpListener::bind(&addr).await {
                Ok(listener) => {
                    if attempt > 1 {
                        debug!(port, attempt, "bound after walking past occupied ports");
                    }
                    return Ok(listener);
                }
                Err(e) if is_bind_conflict(&e) => {
                    debug!(port, error = %e, "port unavailable, trying next candidate");
                    last = Some(e);
                    port = next_port(port, &self.config);
                }
                Err(e) => return Err(ServerError::Io(e)),
            }
        }

        let source = last
            .unwrap_or_else(|| io::Error::new(io::ErrorKind::AddrInUse, "no bind attempts made"));
        Err(ServerError::PortsExhausted {
            attempts: self.config.max_bind_attempts,
            port,
            source,
        })
    }
}

fn next_port(port: u16, config: &ServerConfig) -> u16 {
    if port >= config.port_ceiling {
        config.port_floor
    } else {
        port + 1
    }
}

/// A conflict means another process holds the port; anything else is a real
/// bootstrap failure and aborts the retry loop.
fn is_bind_conflict(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::AddrInUse {
        return true;
    }
    let text = err.to_string().to_ascii_lowercase();
    text.contains("bind") || text.contains("address already in use")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_conflict_detection() {
        assert!(is_bind_conflict(&io::Error::new(
            io::ErrorKind::AddrInUse,
            "in use"
        )));
        assert!(is_bind_conflict(&io::Error::other(
            "Address already in use (os error 98)"
        )));
        assert!(is_bind_conflict(&io::Error::other("failed to bind socket")));
        assert!(!is_bind_conflict(&io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "cannot assign requested address"
        )));
        assert!(!is_bind_conflict(&io::Error::new(
            io::ErrorKind::PermissionDenied,
            "permission denied"
        )));
    }

    #[test]
    fn test_next_port_wraps_at_the_ceiling() {
        let config = ServerConfig {
            port_floor: 100,
            port_ceiling: 102,
            ..ServerConfig::default()
        };
        assert_eq!(next_port(100, &config), 101);
        assert_eq!(next_port(101, &config), 102);
        assert_eq!(next_port(102, &config), 100);
    }
}
