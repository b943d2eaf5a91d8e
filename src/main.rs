//! Lattice admin CLI: attribute reads/writes, operation invocation and
//! fleet-wide admin actions against configured endpoints.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use lattice::config::CliConfig;
use lattice_connect::{
    AdminAction, ChannelInfo, FleetForwarder, ForwardOutcome, InvocationDispatcher, MgmtChannel,
    MgmtContext, TopologyManager,
};
use lattice_core_fleet::{EndpointInfo, Selector};
use lattice_mgmt::{MgmtConfig, DEFAULT_PROTOCOL};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lattice")]
#[command(version, about = "Admin CLI for the Lattice management plane", long_about = None)]
struct Cli {
    /// Endpoint config file
    #[arg(short, long, default_value = "lattice.toml", global = true)]
    config: PathBuf,

    /// Auth token for the handshake (overrides the config file)
    #[arg(long, env = "LATTICE_TOKEN", global = true)]
    token: Option<String>,

    /// Connect timeout in seconds (overrides the config file)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read one attribute of a bean
    Get {
        /// Configured endpoint uuid, or host:port
        #[arg(long)]
        endpoint: String,
        bean: String,
        attribute: String,
    },
    /// Write one attribute of a bean
    Set {
        /// Configured endpoint uuid, or host:port
        #[arg(long)]
        endpoint: String,
        bean: String,
        attribute: String,
        /// New value, as JSON
        value: String,
    },
    /// Invoke an operation on a bean
    Invoke {
        /// Configured endpoint uuid, or host:port
        #[arg(long)]
        endpoint: String,
        bean: String,
        operation: String,
        /// Parameters, each a JSON value (bare words are taken as strings)
        params: Vec<String>,
    },
    /// Fan an admin action out over the fleet
    Fleet {
        #[arg(value_enum)]
        action: FleetAction,
        /// Address every configured endpoint
        #[arg(long, conflicts_with = "uuid")]
        all: bool,
        /// Address specific endpoints by uuid (repeatable)
        #[arg(long)]
        uuid: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum FleetAction {
    Stop,
    Restart,
    Reconnect,
    ResetCounters,
}

impl From<FleetAction> for AdminAction {
    fn from(action: FleetAction) -> Self {
        match action {
            FleetAction::Stop => AdminAction::Stop,
            FleetAction::Restart => AdminAction::Restart,
            FleetAction::Reconnect => AdminAction::Reconnect,
            FleetAction::ResetCounters => AdminAction::ResetCounters,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let mut config = CliConfig::load_or_default(&cli.config)?;
    if cli.token.is_some() {
        config.token = cli.token.clone();
    }
    if let Some(timeout) = cli.timeout {
        config.timeout_secs = timeout;
    }

    match cli.command {
        Command::Get {
            endpoint,
            bean,
            attribute,
        } => {
            let dispatcher = dispatcher_for(&config, &endpoint).await?;
            let value = dispatcher.get_attribute(&bean, &attribute).await?;
            print_value(value)?;
        }
        Command::Set {
            endpoint,
            bean,
            attribute,
            value,
        } => {
            let value: Value = serde_json::from_str(&value)
                .with_context(|| format!("value '{value}' is not valid JSON"))?;
            let dispatcher = dispatcher_for(&config, &endpoint).await?;
            dispatcher.set_attribute(&bean, &attribute, value).await?;
            println!("{}", json!({"ok": true}));
        }
        Command::Invoke {
            endpoint,
            bean,
            operation,
            params,
        } => {
            let params: Vec<Value> = params
                .iter()
                .map(|p| serde_json::from_str(p).unwrap_or_else(|_| Value::String(p.clone())))
                .collect();
            let dispatcher = dispatcher_for(&config, &endpoint).await?;
            let value = dispatcher
                .invoke(&bean, &operation, params, Vec::new())
                .await?;
            print_value(value)?;
        }
        Command::Fleet { action, all, uuid } => {
            fleet(&config, action.into(), all, uuid).await?;
        }
    }

    Ok(())
}

async fn fleet(config: &CliConfig, action: AdminAction, all: bool, uuid: Vec<String>) -> Result<()> {
    if !all && uuid.is_empty() {
        bail!("pass --all or at least one --uuid");
    }
    if config.endpoints.is_empty() {
        bail!("no endpoints configured");
    }

    let selector = if all {
        Selector::All
    } else {
        Selector::uuids(uuid)
    };

    let timeout = Duration::from_secs(config.timeout_secs);
    let topology = Arc::new(TopologyManager::new());
    for entry in &config.endpoints {
        let info = EndpointInfo::new(entry.uuid.as_str(), entry.host.as_str(), entry.port, entry.kind);
        if !selector.matches(&info) {
            continue;
        }
        let channel = open_channel(config, &entry.host, entry.port);
        // Not connecting in time is a per-endpoint failure, never an abort.
        if !channel.connect_and_wait(timeout).await {
            warn!(uuid = %entry.uuid, host = %entry.host, "endpoint did not connect in time");
        }
        topology.register(info, channel).await;
    }

    let forwarder = FleetForwarder::new(topology, Arc::new(MgmtContext::new()));
    let outcomes = forwarder.apply(&selector, action).await;

    let mut report = serde_json::Map::new();
    for (uuid, outcome) in outcomes {
        let entry = match outcome {
            ForwardOutcome::Success(value) => json!({"ok": true, "value": value}),
            ForwardOutcome::Failure(error) => json!({"ok": false, "error": error}),
        };
        report.insert(uuid, entry);
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(report))?);
    Ok(())
}

async fn dispatcher_for(config: &CliConfig, endpoint: &str) -> Result<InvocationDispatcher> {
    let (host, port) = resolve_endpoint(config, endpoint)?;
    let channel = open_channel(config, &host, port);
    let timeout = Duration::from_secs(config.timeout_secs);
    if !channel.connect_and_wait(timeout).await {
        bail!(
            "could not connect to {host}:{port} within {}s",
            config.timeout_secs
        );
    }
    Ok(InvocationDispatcher::new(channel, Arc::new(MgmtContext::new())))
}

fn resolve_endpoint(config: &CliConfig, endpoint: &str) -> Result<(String, u16)> {
    if let Some(entry) = config.endpoint(endpoint) {
        return Ok((entry.host.clone(), entry.port));
    }
    match endpoint.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse()
                .with_context(|| format!("invalid port in '{endpoint}'"))?;
            Ok((host.to_string(), port))
        }
        _ => bail!("unknown endpoint '{endpoint}': not a configured uuid or host:port"),
    }
}

fn open_channel(config: &CliConfig, host: &str, port: u16) -> MgmtChannel {
    let info = ChannelInfo::remote(DEFAULT_PROTOCOL, host, port);
    let client_config = MgmtConfig {
        connect_timeout_ms: (config.timeout_secs as i64) * 1000,
        ..MgmtConfig::default()
    };
    match &config.token {
        Some(token) => MgmtChannel::remote_with_token(info, client_config, token.clone()),
        None => MgmtChannel::remote(info, client_config),
    }
}

fn print_value(value: Option<Value>) -> Result<()> {
    match value {
        Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
        None => println!("null"),
    }
    Ok(())
}

fn init_tracing(debug: bool) {
    let filter = if debug { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
