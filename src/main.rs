//! # Channel Sync Main Entry Point
//!
//! Boots the API server alongside the background workers: the sync
//! scheduler, the job executor, and the token refresh loop. All of
//! them share one shutdown token wired to Ctrl-C.

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use channel_sync::config::ConfigLoader;
use channel_sync::migration::{Migrator, MigratorTrait};
use channel_sync::repositories::ConnectionRepository;
use channel_sync::scheduler::SyncScheduler;
use channel_sync::server::{AppState, run_server};
use channel_sync::sync_executor::SyncExecutor;
use channel_sync::token_refresh::TokenRefreshService;
use channel_sync::{db, telemetry};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ConfigLoader::new().load().context("configuration error")?;
    config.validate().context("invalid configuration")?;

    telemetry::init_tracing(&config).context("failed to initialize tracing")?;
    tracing::info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted) = config.redacted_json() {
        tracing::debug!(config = %redacted, "Effective configuration");
    }

    let config = Arc::new(config);
    let pool = db::init_pool(&config).await.context("database error")?;
    Migrator::up(&pool, None)
        .await
        .context("migration failed")?;
    let pool = Arc::new(pool);

    let state = AppState::new(Arc::clone(&config), Arc::clone(&pool))?;

    let shutdown = CancellationToken::new();

    let connection_repo = ConnectionRepository::new(Arc::clone(&pool), state.crypto_key.clone());
    let token_refresh = Arc::new(TokenRefreshService::new(
        Arc::clone(&config),
        connection_repo,
    ));

    let refresh_handle = {
        let service = Arc::clone(&token_refresh);
        let token = shutdown.clone();
        tokio::spawn(async move { service.run(token).await })
    };

    let scheduler_handle = {
        let scheduler = SyncScheduler::new(Arc::clone(&config), Arc::clone(&pool));
        let token = shutdown.clone();
        tokio::spawn(async move { scheduler.run(token).await })
    };

    let executor_handle = {
        let executor = SyncExecutor::new(
            Arc::clone(&config),
            state.registry.clone(),
            Arc::clone(&token_refresh),
            Arc::clone(&pool),
            state.crypto_key.clone(),
        );
        let token = shutdown.clone();
        tokio::spawn(async move { executor.run(token).await })
    };

    let server_handle = {
        let state = state.clone();
        let token = shutdown.clone();
        tokio::spawn(async move { run_server(state, token).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("Shutdown signal received, draining workers");
    shutdown.cancel();

    let (refresh, scheduler, executor, server) = tokio::join!(
        refresh_handle,
        scheduler_handle,
        executor_handle,
        server_handle
    );
    for result in [refresh, scheduler, executor] {
        if let Err(err) = result {
            tracing::error!(error = %err, "Worker task panicked");
        }
    }
    match server {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!(error = %err, "Server exited with error"),
        Err(err) => tracing::error!(error = %err, "Server task panicked"),
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
