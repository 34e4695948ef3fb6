//! hatunnel CLI - expose a local Home Assistant instance through a relay
//!
//! Keeps one outbound WebSocket to the relay open, reconnecting with backoff,
//! and answers forwarded HTTP requests from the local backend.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use hatunnel_client::config::{DEFAULT_BACKEND_URL, DEFAULT_SERVER_DOMAIN, DEFAULT_STATUS_FILE};
use hatunnel_client::{
    read_status_file, BackendExecutor, ClientConfig, FileStatusSink, MultiStatusSink,
    StatusServer, StatusSink, Supervisor, WatchStatusSink,
};
use hatunnel_transport_websocket::{WebSocketConfig, WebSocketConnector};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const LONG_VERSION: &str = concat!(
    env!("GIT_TAG"),
    " (",
    env!("GIT_HASH"),
    ", built ",
    env!("BUILD_TIME"),
    ")"
);

/// hatunnel - reach your local Home Assistant from anywhere
#[derive(Parser, Debug)]
#[command(name = "hatunnel")]
#[command(about = "Tunnel a local Home Assistant instance through a public relay")]
#[command(version, long_version = LONG_VERSION)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Connect to the relay and serve forwarded requests until stopped
    #[command(long_about = r#"
Connect to the relay, authenticate with the API key and forward every
incoming request to the local backend. Reconnects automatically with
exponential backoff (5s doubling up to 60s) whenever the connection drops.

EXAMPLES:
  # Inside the add-on container
  hatunnel run --api-key $API_KEY --subdomain home

  # Against a development relay with a self-signed certificate
  hatunnel run --relay-url wss://localhost:8443/connect --insecure \
    --backend-url http://127.0.0.1:8123

ENVIRONMENT VARIABLES:
  API_KEY         Credential sent to the relay
  SUBDOMAIN       Public subdomain (<subdomain>.<server domain>)
  SERVER_DOMAIN   Relay domain
  RELAY_URL       Full relay URL, overrides wss://<server domain>/connect
  HA_URL          Local backend base URL
  STATUS_FILE     Where the status line is written
  STATUS_ADDR     Bind address of the status page (disabled if unset)
  RELAY_INSECURE  Skip relay certificate verification
    "#)]
    Run(RunArgs),

    /// Print the last published tunnel status
    Status {
        /// Status file to read
        #[arg(long, env = "STATUS_FILE", default_value = DEFAULT_STATUS_FILE)]
        status_file: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Credential sent to the relay
    #[arg(long, env = "API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Public subdomain
    #[arg(long, env = "SUBDOMAIN")]
    subdomain: Option<String>,

    /// Relay domain
    #[arg(long, env = "SERVER_DOMAIN", default_value = DEFAULT_SERVER_DOMAIN)]
    server_domain: String,

    /// Relay WebSocket URL (defaults to wss://<server-domain>/connect)
    #[arg(long, env = "RELAY_URL")]
    relay_url: Option<String>,

    /// Local backend base URL
    #[arg(long, env = "HA_URL", default_value = DEFAULT_BACKEND_URL)]
    backend_url: String,

    /// Backend request timeout in seconds
    #[arg(long, default_value = "30")]
    backend_timeout: u64,

    /// Status file written on every state change
    #[arg(long, env = "STATUS_FILE", default_value = DEFAULT_STATUS_FILE)]
    status_file: PathBuf,

    /// Serve a status page on this address (e.g., 0.0.0.0:8099)
    #[arg(long, env = "STATUS_ADDR")]
    status_addr: Option<SocketAddr>,

    /// Skip relay certificate verification (development only)
    #[arg(long, env = "RELAY_INSECURE")]
    insecure: bool,
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();
}

fn build_config(args: &RunArgs) -> Result<ClientConfig> {
    let mut builder = ClientConfig::builder()
        .server_domain(args.server_domain.as_str())
        .backend_url(args.backend_url.as_str())
        .backend_timeout(Duration::from_secs(args.backend_timeout));

    if let Some(key) = &args.api_key {
        builder = builder.api_key(key.as_str());
    }
    if let Some(subdomain) = &args.subdomain {
        builder = builder.subdomain(subdomain.as_str());
    }
    if let Some(url) = &args.relay_url {
        builder = builder.relay_url(url.as_str());
    }

    // Fatal before any connection attempt; never retried
    builder.build().context("Invalid configuration")
}

async fn run(args: RunArgs) -> Result<()> {
    info!("hatunnel {} starting...", LONG_VERSION);

    let config = build_config(&args)?;

    info!("Relay: {}", config.relay_url());
    info!("Public host: {}", config.public_host());
    info!("Backend: {}", config.backend_url());

    let mut ws_config = WebSocketConfig::default();
    if args.insecure {
        warn!("⚠️  Certificate verification disabled (insecure mode)");
        ws_config = ws_config.with_insecure_skip_verify();
    }
    let connector = WebSocketConnector::new(config.relay_url(), ws_config)
        .context("Failed to create relay connector")?;

    let executor =
        Arc::new(BackendExecutor::from_config(&config).context("Failed to create HTTP client")?);

    let (watch_sink, status_rx) = WatchStatusSink::new();
    let status: Arc<dyn StatusSink> = Arc::new(
        MultiStatusSink::new()
            .with(Arc::new(FileStatusSink::spawn(&args.status_file)))
            .with(Arc::new(watch_sink)),
    );

    if let Some(addr) = args.status_addr {
        let server = StatusServer::new(addr, status_rx, config.subdomain());
        tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Status server failed: {}", e);
            }
        });
    }

    let supervisor = Supervisor::new(config, connector, executor, status);

    tokio::select! {
        _ = supervisor.run() => {}
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received Ctrl+C, shutting down...");
        }
    }

    info!("hatunnel stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Status { status_file } => {
            println!("{}", read_status_file(&status_file));
            Ok(())
        }
    }
}
