use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use vncgate_common::config::DEFAULT_HTTP_PORT;
use vncgate_common::{ActionTokenMinter, Configuration};
use vncgate_web::{GatewayServer, GatewayState, HttpControlDaemon, SidecarClient, DEFAULT_CONTROL_PORT};

#[derive(Parser)]
#[command(name = "vncgate")]
#[command(about = "WebSocket gateway for VM consoles with brokered VM actions")]
#[command(version)]
struct Cli {
    /// Configuration file (JSON)
    #[arg(short = 'f', long = "config", env = "VNCGATE_CONFIG")]
    config: Option<PathBuf>,

    /// Backend served at /websockify when no configuration file is given
    #[arg(short = 't', long, default_value = "127.0.0.1:5900")]
    target: String,

    /// Web root folder (the configuration file's webRoot takes precedence)
    #[arg(long = "web")]
    web_root: Option<PathBuf>,

    /// HTTP listen port (the configuration file's httpPort takes precedence)
    #[arg(short = 'l', long = "listen", default_value_t = DEFAULT_HTTP_PORT)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port of the VM-local control daemon
    #[arg(long, default_value_t = DEFAULT_CONTROL_PORT)]
    control_port: u16,

    /// Base URL of the token validation and decision service
    #[arg(long, env = "SIDECAR_URL")]
    sidecar_url: Option<String>,

    /// Shared secret for signing action tokens
    #[arg(long, env = "JWT_KEY", hide_env_values = true)]
    jwt_key: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Configuration file if given, otherwise a single `--target` backend.
///
/// The file's `httpPort` and `webRoot` win over `--listen` and `--web`.
fn resolve_config(cli: &Cli) -> anyhow::Result<Configuration> {
    let mut config = match &cli.config {
        Some(path) => Configuration::load(path)
            .with_context(|| format!("cannot load configuration {}", path.display()))?,
        None => Configuration::single_target(&cli.target, cli.port)
            .context("invalid --target")?,
    };
    if config.web_root.is_none() {
        config.web_root = cli.web_root.clone();
    }
    Ok(config)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    info!("vncgate v{}", vncgate_common::VERSION);

    let config = resolve_config(&cli)?;

    let decisions = SidecarClient::new(cli.sidecar_url.as_deref())?;
    if !decisions.is_configured() {
        warn!("No sidecar URL provided, every protected request will be denied");
    }

    let minter = ActionTokenMinter::from_secret(cli.jwt_key.as_deref());
    if !minter.is_enabled() {
        warn!("No JWT key provided, VM actions will fail until one is configured");
    }

    let state = GatewayState::new(
        &config,
        minter,
        Arc::new(decisions),
        Arc::new(HttpControlDaemon::new(cli.control_port)),
    );
    let addr = SocketAddr::new(cli.bind, config.http_port);

    tokio::select! {
        result = GatewayServer::new(state).serve(addr) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
    }
}
