//! Per-range status rows printed by the commands.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use rangekv_core::RangeId;
use rangekv_storage::{score_range, MemoryEngine, Range};

#[derive(Debug, Serialize)]
pub struct RangeRow {
    pub range_id: RangeId,
    pub start_key: String,
    pub end_key: String,
    pub last_scan: Option<DateTime<Utc>>,
    pub oldest_intent: Option<DateTime<Utc>>,
    pub live_bytes: i64,
    pub non_live_bytes: i64,
    pub intent_bytes: i64,
    pub gc_score: f64,
    pub intent_score: f64,
    pub verify_score: f64,
    pub priority: f64,
}

fn datetime(nanos: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(nanos)
}

impl RangeRow {
    pub fn collect(now: DateTime<Utc>, range: &Range<MemoryEngine>) -> Self {
        let desc = range.descriptor();
        let meta = range.scan_metadata();
        let stats = range
            .engine()
            .stats(range.range_id())
            .unwrap_or_default();
        let score = score_range(now, range);

        Self {
            range_id: range.range_id(),
            start_key: desc.start_key.as_bytes().escape_ascii().to_string(),
            end_key: desc.end_key.as_bytes().escape_ascii().to_string(),
            last_scan: (meta.last_scan_nanos > 0).then(|| datetime(meta.last_scan_nanos)),
            oldest_intent: meta.oldest_intent_nanos.map(datetime),
            live_bytes: stats.live_bytes,
            non_live_bytes: stats.non_live_bytes(),
            intent_bytes: stats.intent_bytes,
            gc_score: score.gc_score,
            intent_score: score.intent_score,
            verify_score: score.verify_score,
            priority: score.priority,
        }
    }
}

/// Prints rows as a table, or as JSON lines.
pub fn print_rows(rows: &[RangeRow], json: bool) -> anyhow::Result<()> {
    if json {
        for row in rows {
            println!("{}", serde_json::to_string(row)?);
        }
        return Ok(());
    }

    println!(
        "{:>6}  {:<12} {:<12} {:>10} {:>10} {:>10} {:>8} {:>8} {:>8} {:>9}  {}",
        "range", "start", "end", "live", "non-live", "intents", "gc", "intent", "verify",
        "priority", "last scan"
    );
    for row in rows {
        println!(
            "{:>6}  {:<12} {:<12} {:>10} {:>10} {:>10} {:>8.3} {:>8.3} {:>8.3} {:>9.3}  {}",
            row.range_id,
            truncate(&row.start_key),
            truncate(&row.end_key),
            row.live_bytes,
            row.non_live_bytes,
            row.intent_bytes,
            row.gc_score,
            row.intent_score,
            row.verify_score,
            row.priority,
            row.last_scan
                .map_or_else(|| "never".to_string(), |t| t.to_rfc3339()),
        );
    }
    Ok(())
}

fn truncate(key: &str) -> String {
    if key.is_empty() {
        return "<min>".to_string();
    }
    key.chars().take(12).collect()
}
