//! streamsender -- recurring stream-ingest load generation against a
//! stream-tester harness.
//!
//! The daemon periodically asks the harness to start a batch of simulated
//! broadcasts, polls each batch until the harness reports it finished, and
//! keeps the resulting statistics in SQLite for the control plane to serve.

pub mod api;
pub mod config;
pub mod engine;
pub mod error;
pub mod harness;
pub mod stats;
pub mod storage;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

pub use crate::config::{ConfigCell, RunConfig, Settings};
pub use crate::engine::{Engine, EnginePolicy};
pub use crate::error::Error;
pub use crate::harness::{Harness, HarnessClient};
pub use crate::stats::{ResultRecord, RunId};
pub use crate::storage::{ResultStore, SqliteStore};

/// Run the daemon until `shutdown` is cancelled: control plane, schedule,
/// and stats polling.
pub async fn serve(settings: Settings, shutdown: CancellationToken) -> Result<()> {
    settings.validate().context("invalid settings")?;

    // 1. Storage
    let db_path = &settings.storage.db_path;
    info!(db_path = %db_path.display(), "Initializing database");
    let pool = storage::open_pool(db_path)
        .with_context(|| format!("failed to open stats DB at {}", db_path.display()))?;
    let store: Arc<dyn ResultStore> = Arc::new(SqliteStore::new(pool));

    // 2. Harness
    let harness = HarnessClient::new(
        &settings.harness.address,
        Duration::from_secs(settings.harness.timeout_secs),
    )?;
    info!(harness = %harness.base_url(), "Using stream-tester");

    // 3. Engine
    settings.run.validate().context("invalid initial run configuration")?;
    let policy = EnginePolicy {
        poll_interval: settings.schedule.poll_interval(),
        max_poll_attempts: settings.schedule.max_poll_attempts,
    };
    let engine = Engine::new(
        Arc::new(harness),
        store,
        settings.run.clone(),
        policy,
        &shutdown,
    );

    // 4. Schedule (background task, after the startup delay)
    let schedule = {
        let engine = engine.clone();
        let shutdown = shutdown.clone();
        let delay = settings.schedule.startup_delay();
        let interval = settings.schedule.interval();
        tokio::spawn(async move {
            info!(
                delay_secs = delay.as_secs(),
                interval_secs = interval.as_secs(),
                host = %engine.config().host,
                simultaneous = engine.config().simultaneous,
                "Waiting before sending streams"
            );
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            match engine.run_schedule(interval) {
                Ok(handle) => {
                    if let Err(e) = handle.await {
                        error!(error = %e, "schedule task failed");
                    }
                }
                Err(e) => error!(error = %e, "unable to start schedule"),
            }
        })
    };

    // 5. Control plane
    let bind = &settings.server.bind;
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind control plane on {bind}"))?;
    info!(addr = %listener.local_addr()?, "streamsender listening");

    let app = api::router(api::state::AppState::new(engine.clone()));
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;

    // 6. Shutdown
    info!("stopping stream sender...");
    shutdown.cancel();
    let _ = schedule.await;
    if let Err(e) = engine.stop_schedule().await {
        error!(error = %e, "unable to stop streams");
    }
    engine.shutdown_polls().await;

    served.context("control plane server failed")
}
