use anyhow::{Context, Result};
use chrono::Utc;
use prometheus::{Encoder, TextEncoder};

use rangekv_core::RangeKvConfig;
use rangekv_storage::{new_scan_queue, MemoryEngine};

use super::report::{print_rows, RangeRow};
use super::seed::{seed_store, SeedArgs};

pub struct SimulateOptions {
    pub seed: SeedArgs,
    /// Scheduling ticks to run
    pub cycles: u32,
    pub json: bool,
    /// Dump Prometheus metrics after the run
    pub metrics: bool,
}

/// Seeds a store and runs scan queue ticks over it.
pub async fn run_simulate(config: &RangeKvConfig, options: &SimulateOptions) -> Result<()> {
    let seeded = seed_store(&options.seed, &config.scan_queue)?;
    let queue = new_scan_queue::<MemoryEngine>(&config.scan_queue, seeded.resolver);

    for cycle in 1..=options.cycles {
        let processed = queue.run_cycle(seeded.store.as_ref()).await;
        tracing::info!(cycle, processed, "Scan cycle finished");
    }

    let now = Utc::now();
    let rows: Vec<RangeRow> = seeded
        .store
        .ranges()
        .iter()
        .map(|range| RangeRow::collect(now, range))
        .collect();
    print_rows(&rows, options.json)?;

    if options.metrics {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .context("failed to encode metrics")?;
        println!("{}", String::from_utf8(buffer)?);
    }

    Ok(())
}
