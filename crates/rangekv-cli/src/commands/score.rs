use anyhow::Result;
use chrono::Utc;

use rangekv_core::RangeKvConfig;

use super::report::{print_rows, RangeRow};
use super::seed::{seed_store, SeedArgs};

/// Seeds a store and prints how the scan queue would rank its ranges.
pub fn run_score(config: &RangeKvConfig, seed: &SeedArgs, json: bool) -> Result<()> {
    let seeded = seed_store(seed, &config.scan_queue)?;
    let now = Utc::now();

    let mut rows: Vec<RangeRow> = seeded
        .store
        .ranges()
        .iter()
        .map(|range| RangeRow::collect(now, range))
        .collect();
    rows.sort_by(|a, b| b.priority.total_cmp(&a.priority));

    print_rows(&rows, json)
}
