use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use inventory_core::TenantId;
use inventory_server::{
    AppState, api,
    client::{HttpDeviceMonitorClient, HttpWorkflowsClient},
    config::{Config, StoreConfig},
    context::OpContext,
    inventory::Inventory,
    store::{DataStore, InMemoryDataStore, SqliteDataStore, TenantDataKeeper},
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[derive(Parser)]
#[command(name = "inventory-server")]
#[command(about = "Device inventory service")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, default_value = "inventory.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Prepare the storage of a tenant and exit
    Migrate {
        #[arg(long)]
        tenant: String,
    },
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    let filter =
        std::env::var("RUST_LOG").unwrap_or_else(|_| "inventory_server=info".to_owned());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .init();

    let cli = Cli::parse();

    let config = if cli.config.exists() {
        info!(path = ?cli.config, "Loading configuration");
        Config::load(&cli.config)?
    } else {
        info!("No configuration file found, using defaults");
        Config::default()
    };

    match &config.store {
        StoreConfig::Memory => {
            info!("Using in-memory store");
            run(InMemoryDataStore::new(), config, cli.command).await?;
        }
        StoreConfig::Sqlite { path } => {
            info!(path = ?path, "Using SQLite store");
            let store = SqliteDataStore::new(path).await?;
            run(store, config, cli.command).await?;
        }
    }

    Ok(())
}

async fn run<S>(store: S, config: Config, command: Option<Command>) -> color_eyre::Result<()>
where
    S: DataStore + TenantDataKeeper,
{
    let mut inventory = Inventory::new(store, config.limits.clone());
    if let Some(addr) = &config.clients.workflows_addr {
        info!(%addr, "Reindexing through workflows");
        inventory = inventory.with_workflows(Arc::new(HttpWorkflowsClient::new(addr.clone())));
    }
    if let Some(addr) = &config.clients.devicemonitor_addr {
        inventory =
            inventory.with_devicemonitor(Arc::new(HttpDeviceMonitorClient::new(addr.clone())));
    }

    match command {
        Some(Command::Migrate { tenant }) => {
            let tenant = TenantId::from(tenant.as_str());
            let ctx = OpContext::new().with_tenant(Some(tenant.clone()));
            inventory.create_tenant(&ctx, &tenant).await?;
            Ok(())
        }
        None => serve(inventory, &config, config.server.http_addr).await,
    }
}

async fn serve<S>(
    inventory: Inventory<S>,
    config: &Config,
    http_addr: SocketAddr,
) -> color_eyre::Result<()>
where
    S: DataStore + TenantDataKeeper,
{
    let state = AppState::new(inventory, config);
    let app = api::router().with_state(state);

    let cancel = CancellationToken::new();

    let listener = TcpListener::bind(http_addr).await?;
    info!(%http_addr, "HTTP server listening");

    let cancel_clone = cancel.clone();
    tokio::select! {
        result = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_clone.cancelled().await;
        }) => {
            if let Err(e) = result {
                tracing::error!(error = ?e, "HTTP server error");
            }
            info!("HTTP server shut down");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
            cancel.cancel();
        }
    }

    Ok(())
}
