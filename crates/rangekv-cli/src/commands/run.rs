use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use rangekv_core::{RangeKvConfig, ScanQueueConfig};
use rangekv_storage::{new_scan_queue, MemoryEngine};

use super::report::{print_rows, RangeRow};
use super::seed::{seed_store, SeedArgs, Seeded};

pub struct RunOptions {
    pub seed: SeedArgs,
    pub json: bool,
    /// Stop after this long instead of waiting for a signal
    pub duration: Option<Duration>,
}

/// Seeds a store and runs the scan queue worker over it until shutdown.
pub async fn run_worker(config: &RangeKvConfig, options: &RunOptions) -> Result<()> {
    let seeded = seed_store(&options.seed, &config.scan_queue)?;

    serve(
        &config.scan_queue,
        &seeded,
        shutdown_signal(options.duration),
    )
    .await?;

    let now = Utc::now();
    let rows: Vec<RangeRow> = seeded
        .store
        .ranges()
        .iter()
        .map(|range| RangeRow::collect(now, range))
        .collect();
    print_rows(&rows, options.json)
}

/// Runs the background worker on the configured interval until `shutdown`
/// resolves, then stops it.
async fn serve<F>(config: &ScanQueueConfig, seeded: &Seeded, shutdown: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let mut queue = new_scan_queue::<MemoryEngine>(config, Arc::clone(&seeded.resolver));
    queue.start_worker(seeded.store.clone(), config.worker_interval());
    tracing::info!(
        interval_secs = config.worker_interval_secs,
        ranges = seeded.store.range_count(),
        "Scan queue worker started"
    );

    let result = shutdown.await;
    queue.shutdown().await;
    result
}

/// Resolves on SIGINT, SIGTERM or once `duration` has elapsed.
async fn shutdown_signal(duration: Option<Duration>) -> Result<()> {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .context("failed to install Ctrl+C handler")
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?
            .recv()
            .await;
        Ok::<(), anyhow::Error>(())
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Result<()>>();

    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        result = ctrl_c => {
            result?;
            tracing::info!("Received SIGINT, shutting down");
        }
        result = terminate => {
            result?;
            tracing::info!("Received SIGTERM, shutting down");
        }
        _ = deadline => {
            tracing::info!("Run duration elapsed, shutting down");
        }
    }
    Ok(())
}
