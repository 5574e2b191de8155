use chrono::{DateTime, Utc};

use rangekv_core::metrics::SCAN_STAT_ERRORS;
use rangekv_core::{CoreResult, RangeId, Timestamp};

use super::{GC_BYTE_COUNT_NORMALIZATION, INTENT_SWEEP_INTERVAL, VERIFICATION_INTERVAL};
use crate::engine::{Engine, RangeStat};
use crate::range::Range;

/// Breakdown of a range's scan priority.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScanPriority {
    /// Estimated collectable bytes over [`GC_BYTE_COUNT_NORMALIZATION`].
    pub gc_score: f64,
    /// Elapsed time over [`INTENT_SWEEP_INTERVAL`]; zero without intents.
    pub intent_score: f64,
    /// Elapsed time over [`VERIFICATION_INTERVAL`].
    pub verify_score: f64,
    /// Combined priority.
    pub priority: f64,
}

impl ScanPriority {
    pub fn should_queue(&self) -> bool {
        self.priority > 0.0
    }
}

/// Combines the three staleness signals of a range into one priority.
///
/// GC counts from the first collectable byte. Intent sweeps and verification
/// only count once their interval has fully elapsed.
pub fn compute_priority(
    elapsed_nanos: i64,
    estimated_gc_bytes: i64,
    intent_bytes: i64,
) -> ScanPriority {
    let elapsed = elapsed_nanos as f64;
    let gc_score = estimated_gc_bytes as f64 / GC_BYTE_COUNT_NORMALIZATION as f64;
    let intent_score = if intent_bytes > 0 {
        elapsed / INTENT_SWEEP_INTERVAL.as_nanos() as f64
    } else {
        0.0
    };
    let verify_score = elapsed / VERIFICATION_INTERVAL.as_nanos() as f64;

    let priority =
        gc_score.max(0.0) + (intent_score - 1.0).max(0.0) + (verify_score - 1.0).max(0.0);

    ScanPriority {
        gc_score,
        intent_score,
        verify_score,
        priority,
    }
}

/// Scores `range` from its scan metadata and engine statistics.
///
/// Only statistics are consulted, never data. A statistic that cannot be read
/// counts as zero for this decision.
pub fn score_range<E: Engine>(now: DateTime<Utc>, range: &Range<E>) -> ScanPriority {
    let range_id = range.range_id();
    let engine = range.engine();
    let meta = range.scan_metadata();
    let elapsed = meta.elapsed_nanos(Timestamp::from_datetime(now).wall_time);

    let total_bytes = stat_or_zero(range_id, "total_bytes", engine.range_size(range_id));
    let live_bytes = stat_or_zero(
        range_id,
        RangeStat::LiveBytes.as_str(),
        engine.range_stat(range_id, RangeStat::LiveBytes),
    );
    let estimated_gc_bytes = meta
        .gc
        .estimated_bytes(elapsed, total_bytes - live_bytes);

    let intent_bytes = stat_or_zero(
        range_id,
        RangeStat::IntentBytes.as_str(),
        engine.range_stat(range_id, RangeStat::IntentBytes),
    );

    compute_priority(elapsed, estimated_gc_bytes, intent_bytes)
}

fn stat_or_zero(range_id: RangeId, stat: &'static str, result: CoreResult<i64>) -> i64 {
    result.unwrap_or_else(|e| {
        SCAN_STAT_ERRORS.with_label_values(&[stat]).inc();
        tracing::warn!(range_id = %range_id, stat, error = %e, "Failed to read range statistic");
        0
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use bytes::Bytes;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rangekv_core::{ClusterId, Key, NodeId, RangeDescriptor, Replica, StoreId};
    use uuid::Uuid;

    use crate::engine::{MemoryEngine, TxnMeta};

    const HOUR: i64 = 3_600 * 1_000_000_000;
    const DAY: i64 = 24 * HOUR;
    const MIB: i64 = 1 << 20;

    fn range() -> Range<MemoryEngine> {
        let range_id = RangeId::new(1);
        let desc = RangeDescriptor::new(
            range_id,
            Key::MIN,
            Key::MAX,
            vec![Replica::new(NodeId::new(1), StoreId::new(1), range_id)],
        );
        Range::new(ClusterId::new(), desc, Arc::new(MemoryEngine::new()), 3_600).unwrap()
    }

    fn at(nanos: i64) -> DateTime<Utc> {
        Utc.timestamp_nanos(nanos)
    }

    #[test]
    fn test_fresh_idle_range_is_not_queued() {
        let score = compute_priority(0, 0, 0);
        assert_eq!(score.priority, 0.0);
        assert!(!score.should_queue());
    }

    #[test]
    fn test_overdue_verification() {
        let score = compute_priority(31 * DAY, 0, 0);
        assert_eq!(score.gc_score, 0.0);
        assert_eq!(score.intent_score, 0.0);
        assert!((score.verify_score - 31.0 / 30.0).abs() < 1e-9);
        assert!((score.priority - 1.0 / 30.0).abs() < 1e-9);
        assert!(score.should_queue());
    }

    #[test]
    fn test_gc_dominates_young_intents() {
        let score = compute_priority(HOUR, 2 * MIB, 500);
        assert_eq!(score.gc_score, 2.0);
        assert!((score.intent_score - 1.0 / 240.0).abs() < 1e-9);
        assert!(score.verify_score < 0.002);
        assert_eq!(score.priority, 2.0);
    }

    #[test]
    fn test_negative_gc_estimate_does_not_lower_priority() {
        let score = compute_priority(31 * DAY, -MIB, 0);
        assert_eq!(score.gc_score, -1.0);
        assert!((score.priority - 1.0 / 30.0).abs() < 1e-9);
    }

    #[test]
    fn test_score_range_without_previous_scan() {
        let range = range();
        let engine = range.engine();
        let key = Key::from("k");
        for i in 0..4 {
            engine
                .put(&key, Timestamp::from_nanos(i), Bytes::from(vec![0u8; 512 * 1024]))
                .unwrap();
        }

        // Elapsed since the epoch is far beyond both intervals.
        let score = score_range(at(1_000 * DAY), &range);
        let non_live = engine.stats(range.range_id()).unwrap().non_live_bytes();
        assert!((score.gc_score - non_live as f64 / MIB as f64).abs() < 1e-9);
        assert_eq!(score.intent_score, 0.0);
        assert!(score.verify_score > 1.0);
        assert!(score.should_queue());
    }

    #[test]
    fn test_score_range_counts_intents() {
        let range = range();
        range
            .engine()
            .put_intent(
                &Key::from("k"),
                TxnMeta {
                    txn_id: Uuid::new_v4(),
                    timestamp: Timestamp::from_nanos(1),
                },
                Some(Bytes::from("v")),
            )
            .unwrap();
        range.update_scan_metadata(|meta| meta.last_scan_nanos = DAY);

        let score = score_range(at(12 * DAY), &range);
        assert!((score.intent_score - 1.1).abs() < 1e-9);
        assert!(score.should_queue());
    }

    #[test]
    fn test_stat_failures_count_as_zero() {
        let range = range();
        let engine = range.engine();
        engine
            .put(&Key::from("k"), Timestamp::from_nanos(1), Bytes::from("v1"))
            .unwrap();
        engine
            .put(&Key::from("k"), Timestamp::from_nanos(2), Bytes::from("v2"))
            .unwrap();
        range.update_scan_metadata(|meta| meta.last_scan_nanos = 1);

        engine.fail_range_size(true);
        engine.fail_stat(RangeStat::LiveBytes, true);
        engine.fail_stat(RangeStat::IntentBytes, true);

        let score = score_range(at(HOUR), &range);
        assert_eq!(score.gc_score, 0.0);
        assert_eq!(score.intent_score, 0.0);
        assert!(!score.should_queue());
    }

    proptest! {
        #[test]
        fn prop_no_intent_contribution_without_intents(elapsed in 0i64..=10 * DAY) {
            prop_assert_eq!(compute_priority(elapsed, 0, 0).intent_score, 0.0);
        }

        #[test]
        fn prop_admission_matches_priority(
            elapsed in 0i64..=400 * DAY,
            gc_bytes in -MIB..=100 * MIB,
            intent_bytes in 0i64..=1_000,
        ) {
            let score = compute_priority(elapsed, gc_bytes, intent_bytes);
            prop_assert_eq!(score.should_queue(), score.priority > 0.0);
            prop_assert!(score.priority >= 0.0);
        }

        #[test]
        fn prop_gc_contribution_increases_with_bytes(
            elapsed in 0i64..=400 * DAY,
            gc_bytes in 0i64..=100 * MIB,
            extra in 1i64..=MIB,
            intent_bytes in 0i64..=1_000,
        ) {
            let lower = compute_priority(elapsed, gc_bytes, intent_bytes);
            let higher = compute_priority(elapsed, gc_bytes + extra, intent_bytes);
            prop_assert!(higher.gc_score > lower.gc_score);
            prop_assert!(higher.priority > lower.priority);
            prop_assert_eq!(higher.intent_score, lower.intent_score);
            prop_assert_eq!(higher.verify_score, lower.verify_score);
        }

        #[test]
        fn prop_intervals_contribute_only_when_overdue(elapsed in 0i64..=60 * DAY) {
            let score = compute_priority(elapsed, 0, 1);
            let intent_due = elapsed > 10 * DAY;
            let verify_due = elapsed > 30 * DAY;
            prop_assert_eq!(score.priority > 0.0, intent_due || verify_due);
            if !intent_due {
                prop_assert_eq!(score.priority, 0.0);
            }
        }
    }
}
