//! stratus Control Plane
//!
//! Hosts the reconciliation pipelines: the provisioning scheduler for
//! submitted jobs and one pipeline per cloud resource type.

use std::sync::Arc;

use anyhow::Result;
use stratus_control_plane::{
    backends::{BackendCache, BackendRegistry, MockBackendFactory},
    config,
    db::Database,
    pipelines::spawn_pipelines,
    state::ServerContext,
};
use stratus_resources::BackendType;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = config::Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to STRATUS_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(server_name = %config.server_name, "Starting stratus control plane");

    // Connect to database
    let db = match Database::connect(&config.database).await {
        Ok(db) => {
            info!("Database connection established");
            db
        }
        Err(e) => {
            error!(error = %e, "Failed to connect to database");
            return Err(e.into());
        }
    };

    // Run migrations in dev mode
    if config.dev_mode {
        info!("Running database migrations (dev mode)");
        if let Err(e) = db.run_migrations().await {
            error!(error = %e, "Failed to run migrations");
            return Err(e.into());
        }
    }

    let stores = db.stores();

    let mut registry = BackendRegistry::new();
    if config.dev_mode {
        registry.register(BackendType::Mock, Arc::new(MockBackendFactory));
    }
    if !registry.is_registered(BackendType::Mock) {
        warn!("No backend implementations registered, jobs cannot be provisioned");
    }
    let backends = Arc::new(BackendCache::new(registry, stores.backend_configs.clone()));

    let ctx = ServerContext::new(stores, backends);

    // Create shutdown channel for graceful shutdown
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles = spawn_pipelines(&ctx, config.pipelines.clone(), shutdown_rx);
    info!(pipelines = handles.len(), "Pipelines started");

    // Wait for shutdown signal (Ctrl+C)
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Received shutdown signal");

    // Signal shutdown to all pipelines
    let _ = shutdown_tx.send(true);

    // Wait for pipelines to finish
    info!("Waiting for pipelines to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    for handle in handles {
        match tokio::time::timeout(shutdown_timeout, handle).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Pipeline task panicked"),
            Err(e) => warn!(error = %e, "Pipeline did not shut down in time"),
        }
    }

    info!("Control plane shutdown complete");
    Ok(())
}
