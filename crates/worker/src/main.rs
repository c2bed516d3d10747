//! Feedline fan-out worker entry point.

use std::sync::Arc;

use anyhow::Context;
use feedline_common::{Config, LogFormat, LoggingConfig};
use feedline_db::{PostgresFeedStore, SharedFeedStore};
use feedline_queue::{FeedWorker, PipelineSettings, RedisQueueReader};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);

    match logging.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

/// Waits for a shutdown signal (SIGINT or SIGTERM).
///
/// On Unix systems, this listens for both SIGINT (Ctrl+C) and SIGTERM.
/// On Windows, this only listens for Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received SIGINT, initiating graceful shutdown...");
        },
        () = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(&config.logging);

    info!("Starting feedline worker...");

    let db = feedline_db::init(&config)
        .await
        .context("Failed to connect to database")?;
    info!("Connected to database");

    if config.database.run_migrations {
        info!("Running database migrations...");
        feedline_db::migrate(&db).await?;
        info!("Migrations completed");
    }

    let store: SharedFeedStore = Arc::new(PostgresFeedStore::new(Arc::new(db)));

    let reader = match RedisQueueReader::connect(&config.queue).await {
        Ok(reader) => reader,
        Err(e) => {
            store.close().await;
            return Err(e).context("Failed to connect to queue");
        }
    };

    let worker = FeedWorker::new(
        store,
        Arc::new(reader),
        PipelineSettings::from(&config.worker),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let summary = worker.run(cancel).await;
    info!(?summary, "Pipeline drained");

    if let Err(e) = worker.close().await {
        warn!(error = %e, "Queue reader did not close cleanly");
    }

    info!("Shutdown complete");
    Ok(())
}
