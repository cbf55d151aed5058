//! Cadence notification scheduler.
//!
//! Main entry point. Loads configuration, opens and migrates the database,
//! then runs the sync engine and the HTTP API until a shutdown signal
//! arrives.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use cadence_api::{server::create_router_with_timeout, AppState, Config};
use cadence_core::{storage, Clock, RealClock, Scheduler, Storage};
use cadence_hub::SyncEngine;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_tracing(&config.rust_log)?;

    info!(
        database_url = %config.database_url,
        hub_url = %config.hub_url,
        max_connections = config.database_max_connections,
        "configuration loaded"
    );

    let pool = connect_with_retries(&config).await?;
    let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
    let storage = Arc::new(Storage::new(pool.clone(), clock.clone()));
    storage.migrate().await.context("Failed to migrate database")?;
    info!("database ready");

    let scheduler = Scheduler::new(storage.clone(), clock.clone(), config.to_schedule_config());

    let mut engine = SyncEngine::over_http(
        storage.clone(),
        scheduler,
        clock.clone(),
        config.to_client_config(),
        config.to_engine_config(),
    )
    .context("Failed to create sync engine")?;
    engine.start();

    let state = AppState {
        storage,
        clock,
        credentials: Arc::new(config.admin_credentials()),
    };
    let router = create_router_with_timeout(state, config.request_timeout());
    let addr = config.parse_server_addr()?;

    let shutdown = CancellationToken::new();
    let mut server = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) =
                cadence_api::start_server(router, addr, shutdown.cancelled_owned()).await
            {
                error!(error = %e, "server failed");
            }
        }
    });

    info!(%addr, "cadence is running");

    let server_exited = tokio::select! {
        () = cadence_api::shutdown_signal() => false,
        _ = &mut server => {
            warn!("server exited before shutdown signal");
            true
        },
    };

    shutdown.cancel();
    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "sync engine did not stop cleanly");
    }

    if !server_exited {
        match tokio::time::timeout(config.request_timeout(), server).await {
            Ok(_) => info!("server stopped"),
            Err(_) => warn!("server grace period expired"),
        }
    }

    pool.close().await;
    info!("cadence shutdown complete");
    Ok(())
}

/// Installs the tracing subscriber; `RUST_LOG` wins over the configured filter.
fn init_tracing(default_filter: &str) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    let fmt_layer = fmt::layer().compact().with_target(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).try_init()?;
    Ok(())
}

/// Opens the database pool, retrying while the file system settles.
async fn connect_with_retries(config: &Config) -> Result<sqlx::SqlitePool> {
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let pool_config = config.to_pool_config();
    let mut retries = 0;
    loop {
        match storage::connect(&pool_config).await {
            Ok(pool) => return Ok(pool),
            Err(e) if retries < MAX_RETRIES => {
                retries += 1;
                warn!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    error = %e,
                    "database connection failed, retrying"
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to open database after retries");
            },
        }
    }
}
