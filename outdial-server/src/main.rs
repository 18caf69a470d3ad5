//! Outdial Server
//!
//! An outbound telephony campaign engine: originates announcement calls
//! through the PBX control channel, correlates the asynchronous event
//! stream back to campaigns and recipients, and exposes the per-call
//! status to operators.

mod api;
mod config;
mod server;
mod shutdown;
mod state;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use outdial_ami::AmiSupervisor;
use outdial_core::calls::{CallStateStore, DtmfBuffers, PendingCorrelations};
use outdial_core::correlate::{CorrelatorHandle, EventCorrelator};
use outdial_core::events::ami_event_channel;
use outdial_core::pbx::{AsteriskCli, PbxCommands};
use outdial_core::processors::CampaignScheduler;
use server::{build_router, run_server};
use shutdown::spawn_config_reload_handler;
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Outdial - outbound telephony campaign engine
#[derive(Parser, Debug)]
#[command(name = "outdial-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./outdial-config.toml")]
    config: PathBuf,

    /// Override the listen address (e.g., 0.0.0.0:8080)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Parse command line arguments
    let args = Args::parse();

    tracing::info!("Starting outdial-server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config_loader = Arc::new(ConfigLoader::new(&args.config, args.listen));
    let runtime_config = config_loader.load().map_err(|e| {
        tracing::error!("Failed to load configuration: {}", e);
        e
    })?;

    let listen_addr = runtime_config.server.listen;
    tracing::info!("Configuration loaded from {:?}", args.config);

    // Get database URL from environment
    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    // Create database connection pool
    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    // Shared call-tracking services, one lock each
    let store = Arc::new(CallStateStore::new());
    let pending = Arc::new(PendingCorrelations::new());
    let dtmf = Arc::new(DtmfBuffers::new());
    let supervisor = Arc::new(AmiSupervisor::new(runtime_config.ami.clone()));
    let pbx: Arc<dyn PbxCommands> = Arc::new(AsteriskCli::new());

    // Shutdown fan-out for the background processors
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Event correlator, fed by a handler on the connection registry
    let (event_tx, event_rx) = ami_event_channel();
    supervisor.add_handler(Arc::new(CorrelatorHandle::new(event_tx)));
    tokio::spawn(
        EventCorrelator::new(
            db_pool.clone(),
            Arc::clone(&store),
            Arc::clone(&pending),
            Arc::clone(&dtmf),
            event_rx,
            shutdown_rx.clone(),
        )
        .run(),
    );

    // Bring the control channel up eagerly; a failure here is not fatal,
    // the supervisor re-establishes it lazily on first use.
    if let Err(e) = supervisor.ensure_connected().await {
        tracing::warn!(error = %e, "control channel unavailable at startup, will retry on demand");
    }

    // Campaign scheduler and its watchdogs
    tokio::spawn(
        CampaignScheduler::new(
            db_pool.clone(),
            Arc::clone(&store),
            Arc::clone(&pending),
            Arc::clone(&supervisor),
            Arc::clone(&pbx),
            runtime_config.dialer.clone(),
            shutdown_rx.clone(),
        )
        .run(),
    );

    // Create application state
    let state = AppState::new(
        db_pool.clone(),
        store,
        pending,
        Arc::clone(&supervisor),
        pbx,
        runtime_config,
    );

    // Spawn config reload handler (listens for SIGHUP)
    let reload_notify = spawn_config_reload_handler(state.clone(), config_loader);

    // Build the router
    let router = build_router(state);

    // Run the server
    tracing::info!("Starting HTTP server on {}", listen_addr);
    let result = run_server(router, listen_addr, shutdown_tx).await;

    // Signal the config reload handler to stop
    reload_notify.notify_one();

    // Drop the control channel and close database connections gracefully
    supervisor.shutdown().await;
    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
