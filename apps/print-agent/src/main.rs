//! # Arka Print Agent
//!
//! Owns the fiscal printer. Terminals queue jobs over HTTP; one worker
//! prints them in order.
//!
//! ## Startup
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  1. tracing (RUST_LOG, default info,arka=debug,sqlx=warn)              │
//! │  2. FiscalConfig: defaults → fiscal.toml → ARKA_* env → validate       │
//! │  3. SQLite queue (migrations run on open)                              │
//! │  4. FiscalService over the driver factory                              │
//! │  5. PrintWorker spawned (requeues claims from a crashed run)           │
//! │  6. HTTP API until SIGINT/SIGTERM, then worker shutdown                │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod api;

use std::sync::Arc;

use arka_db::{Database, DbConfig};
use arka_fiscal::{
    DriverFactory, FiscalConfig, FiscalService, LogStornoListener, PrintWorker,
    SimulatedPrinter, SimulatorFactory, StaticCompanySource,
};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,arka=debug,sqlx=warn")),
        )
        .with_target(true)
        .init();

    info!("Starting Arka print agent...");

    let config = FiscalConfig::load(None)?;
    info!(
        gateway = %format!("{}:{}", config.gateway.host, config.gateway.port),
        device_port = ?config.device.port,
        simulate = config.device.simulate,
        db_path = %config.worker.db_path.display(),
        "Configuration loaded"
    );

    if let Some(parent) = config.worker.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = Database::new(DbConfig::new(config.worker.db_path.clone())).await?;
    info!("Print queue ready");

    let factory = driver_factory(&config)?;
    let company = Arc::new(StaticCompanySource::new(config.company_settings()));
    let bind_addr = config.api.bind_address();
    let service = Arc::new(FiscalService::new(factory, config, company));

    let (worker, worker_handle) =
        PrintWorker::new(service.clone(), db.clone(), Arc::new(LogStornoListener));
    let worker_task = tokio::spawn(worker.run());

    let state = Arc::new(AppState { db, service });
    let listener = TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "Submission API listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(e) = worker_handle.shutdown().await {
        error!(error = %e, "Failed to signal print worker");
    }
    if let Err(e) = worker_task.await {
        error!(error = %e, "Print worker task panicked");
    }

    info!("Print agent shutdown complete");
    Ok(())
}

/// Picks the device driver.
///
/// Vendor adapters implement `DriverFactory` and are linked in here; the
/// simulator stands in when `device.simulate` is set.
fn driver_factory(config: &FiscalConfig) -> Result<Arc<dyn DriverFactory>, Box<dyn std::error::Error>> {
    if config.device.simulate {
        info!("Using simulated fiscal printer");
        return Ok(Arc::new(SimulatorFactory::new(Arc::new(SimulatedPrinter::new()))));
    }

    Err("no vendor fiscal driver is linked into this build; set ARKA_SIMULATE=true or provide a DriverFactory".into())
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown...");
}
