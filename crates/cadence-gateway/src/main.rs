use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use cadence_core::CadenceConfig;
use cadence_runtime::{ScheduleHost, SignalDispatcher, SystemClock, WorkloadRunner};
use clap::Parser;
use tracing::{info, warn};

mod app;
mod http;
mod workloads;

/// HTTP gateway for durable recurring schedules.
#[derive(Debug, Parser)]
#[command(name = "cadence-gateway", version)]
struct Args {
    /// Config file (default: $CADENCE_CONFIG, then ~/.cadence/cadence.toml)
    #[arg(long)]
    config: Option<String>,
    /// Override gateway.bind
    #[arg(long)]
    bind: Option<String>,
    /// Override gateway.port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cadence_gateway=info,cadence_runtime=info,cadence_schedule=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let args = Args::parse();

    // load config: --config > CADENCE_CONFIG env > ~/.cadence/cadence.toml
    let config_path = args
        .config
        .clone()
        .or_else(|| std::env::var("CADENCE_CONFIG").ok());
    let mut config = CadenceConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!(code = e.code(), "Config load failed ({}), using defaults", e);
        CadenceConfig::default()
    });
    if let Some(bind) = args.bind {
        config.gateway.bind = bind;
    }
    if let Some(port) = args.port {
        config.gateway.port = port;
    }

    let db_path = config.database.path.clone();
    ensure_parent_dir(&db_path);
    info!(path = %db_path, "opening SQLite database");
    let db = rusqlite::Connection::open(&db_path)?;
    db.execute_batch("PRAGMA journal_mode=WAL;")?;

    // Launch channel: ScheduleHost -> WorkloadRunner
    let (launch_tx, launch_rx) = tokio::sync::mpsc::channel(256);
    let host = Arc::new(ScheduleHost::new(
        db,
        Arc::new(SystemClock),
        Some(launch_tx),
    )?);
    host.recover_on_startup()?;
    info!("database migrations complete");

    let registry = Arc::new(workloads::builtin_registry());
    let runner = WorkloadRunner::new(Arc::clone(&host), Arc::clone(&registry));
    tokio::spawn(runner.run(launch_rx));

    let dispatcher = SignalDispatcher::new(
        Arc::clone(&host),
        Duration::from_millis(config.dispatcher.poll_interval_ms),
        config.dispatcher.batch_size,
    );
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let dispatcher_task = tokio::spawn(dispatcher.run(shutdown_rx));

    let addr: SocketAddr = format!("{}:{}", config.gateway.bind, config.gateway.port).parse()?;
    let state = Arc::new(app::AppState::new(config, host, registry));
    let router = app::build_router(state);

    info!("Cadence gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // signal dispatcher to stop
    let _ = shutdown_tx.send(true);
    let _ = dispatcher_task.await;
    info!("Cadence gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

/// Ensure the parent directory for a file path exists.
fn ensure_parent_dir(path: &str) {
    if let Some(parent) = std::path::Path::new(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
}
