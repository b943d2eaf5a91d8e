//! Lattice node agent: serves the management endpoint with the built-in
//! admin and system-info beans registered.

mod beans;

use anyhow::{Context, Result};
use beans::{AgentSignal, NodeAdminBean, SystemInfoBean, ADMIN_BEAN, SYSTEM_BEAN};
use clap::Parser;
use lattice_core_fleet::EndpointKind;
use lattice_mgmt::{BeanName, BeanRegistry, DEFAULT_PORT};
use lattice_server::{MgmtServer, ServerConfig};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "lattice-agent")]
#[command(version, about = "Lattice node agent", long_about = None)]
struct Cli {
    /// Preferred port; occupied ports walk to the next candidate
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Bind address
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Auth token clients must present; omit to disable auth
    #[arg(short, long, env = "LATTICE_AGENT_TOKEN")]
    token: Option<String>,

    /// Endpoint kind this agent serves as
    #[arg(long, default_value = "node")]
    kind: EndpointKind,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        kind = %cli.kind,
        "starting lattice agent"
    );

    let (signal_tx, mut signal_rx) = mpsc::channel(1);

    let registry = Arc::new(BeanRegistry::new());
    let admin_name: BeanName = ADMIN_BEAN.parse()?;
    registry
        .register(
            admin_name,
            Arc::new(NodeAdminBean::new(cli.bind.clone(), signal_tx)),
        )
        .context("registering the admin bean")?;
    let system_name: BeanName = SYSTEM_BEAN.parse()?;
    registry
        .register(system_name, Arc::new(SystemInfoBean::probe()))
        .context("registering the system-info bean")?;

    let config = ServerConfig {
        bind_host: cli.bind,
        port: cli.port,
        port_floor: cli.port,
        port_ceiling: cli.port.saturating_add(100),
        auth_token: cli.token,
        ..ServerConfig::default()
    };
    let server = MgmtServer::new(config, cli.kind);
    let addr = server
        .start(Arc::clone(&registry))
        .await
        .context("starting the management server")?;
    info!(%addr, "agent ready");

    let signal = tokio::select! {
        _ = tokio::signal::ctrl_c() => None,
        signal = signal_rx.recv() => signal,
    };
    match signal {
        Some(AgentSignal::Stop) => info!("stop requested through the admin bean"),
        Some(AgentSignal::Restart) => {
            info!("restart requested, exiting for the supervisor to relaunch")
        }
        None => info!("interrupt received, shutting down"),
    }

    server.stop().await;
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
