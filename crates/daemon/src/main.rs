//! Storybench Daemon - Main Entry Point
//!
//! Composition root: wires the SQLite gateway, the HTTP model client and
//! the job engine together and serves them over JSON-RPC.

mod telemetry;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use storybench_api_rpc::{RpcServer, RpcServerConfig};
use storybench_core::application::{
    cancel_channel, EngineConfig, Janitor, JobEngine, JobRegistry, ProgressChannel, WatchConfig,
};
use storybench_core::port::id_provider::UuidProvider;
use storybench_core::port::time_provider::SystemTimeProvider;
use storybench_infra_llm::{HttpModelClient, ProviderConfig};
use storybench_infra_sqlite::{create_pool, run_migrations, SqliteGateway};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_DB_PATH: &str = "~/.storybench/storybench.db";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Logging (and optional OpenTelemetry export)
    let _log_guard = telemetry::init()?;

    info!("Storybench daemon v{} starting...", VERSION);

    // 2. Load configuration
    let db_path = std::env::var("STORYBENCH_DB_PATH")
        .unwrap_or_else(|_| shellexpand::tilde(DEFAULT_DB_PATH).into_owned());

    let rpc_port: u16 = std::env::var("STORYBENCH_RPC_PORT")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(9630);

    info!(db_path = %db_path, "Initializing database...");

    // 3. Initialize database
    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let pool = create_pool(&db_path).await?;
    run_migrations(&pool).await?;

    // 4. Setup dependencies (DI wiring)
    let clock = Arc::new(SystemTimeProvider);
    let ids = Arc::new(UuidProvider);
    let gateway = Arc::new(SqliteGateway::new(pool.clone(), clock.clone()));
    let model_client = Arc::new(HttpModelClient::new(ProviderConfig::from_env())?);

    let engine_config = EngineConfig::default();
    let registry = Arc::new(JobRegistry::new(clock.clone()));
    let engine = Arc::new(JobEngine::new(
        registry.clone(),
        gateway,
        model_client,
        ids,
        clock,
        engine_config.clone(),
    ));
    let progress = Arc::new(ProgressChannel::new(
        registry.clone(),
        WatchConfig::default(),
    ));

    // 5. Background janitor
    let (shutdown, shutdown_token) = cancel_channel();
    let janitor = Janitor::new(registry, &engine_config);
    let janitor_handle = tokio::spawn(janitor.run(shutdown_token));

    // 6. Start JSON-RPC server
    info!("Starting JSON-RPC server...");
    let rpc_config = RpcServerConfig {
        port: rpc_port,
        ..Default::default()
    };
    let (rpc_addr, rpc_handle) = RpcServer::new(rpc_config, engine, progress).start().await?;

    info!(addr = %rpc_addr, "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 7. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 8. Graceful shutdown
    shutdown.cancel();
    rpc_handle
        .stop()
        .map_err(|e| anyhow::anyhow!("RPC server stop failed: {}", e))?;
    let _ = tokio::time::timeout(std::time::Duration::from_secs(5), janitor_handle).await;

    info!("Shutdown complete.");

    Ok(())
}
