//! One scan pass over a range.
//!
//! A pass walks a snapshot of the range once. Each key read is checksum
//! verified by the engine, expired versions are collected in batches and
//! intents older than the age threshold are handed to the intent resolver.
//!
//! GC batches are applied as they fill. A fatal error (snapshot failure,
//! corrupt version) ends the pass without touching scan metadata, but batches
//! applied before the failure stay applied. Per-key GC and intent failures do
//! not end the pass; metadata is still updated and the failures are reported
//! as [`CoreError::PartialScan`].

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rangekv_core::metrics::{SCAN_CHECKSUM_FAILURES, SCAN_GC_BYTES, SCAN_INTENTS};
use rangekv_core::{CoreError, CoreResult, Key, RangeDescriptor, RangeId, Timestamp, GC_BUCKETS};

use super::SCAN_QUEUE_NAME;
use crate::engine::{Engine, GcKey, GcResult, KeyVersions, Snapshot, TxnMeta};
use crate::gc::GcPolicy;
use crate::intent::IntentResolver;
use crate::range::Range;

/// Counters describing one completed pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub keys_scanned: usize,
    /// Versions read, and therefore checksum verified.
    pub versions_verified: usize,
    /// Successful `Engine::gc` calls, per-key retries included.
    pub gc_batches: usize,
    pub gc_versions_removed: usize,
    pub gc_bytes_reclaimed: i64,
    pub intents_resolved: usize,
    /// Intents younger than the age threshold, left alone.
    pub intents_skipped: usize,
    pub gc_failures: usize,
    pub intent_failures: usize,
}

struct AbandonedIntent {
    key: Key,
    txn: TxnMeta,
    bytes: i64,
}

/// Working state of a pass.
struct ScanPass {
    report: ScanReport,
    byte_counts: Vec<i64>,
    retained_non_live_bytes: i64,
    unresolved_intent_bytes: i64,
    oldest_intent_nanos: Option<i64>,
    abandoned: Vec<AbandonedIntent>,
    batch: Vec<GcKey>,
    /// Collectable bytes of each batch entry, by position.
    batch_bytes: Vec<i64>,
    first_error: Option<String>,
}

impl ScanPass {
    fn new() -> Self {
        Self {
            report: ScanReport::default(),
            byte_counts: vec![0; GC_BUCKETS],
            retained_non_live_bytes: 0,
            unresolved_intent_bytes: 0,
            oldest_intent_nanos: None,
            abandoned: Vec::new(),
            batch: Vec::new(),
            batch_bytes: Vec::new(),
            first_error: None,
        }
    }

    fn keep_intent(&mut self, timestamp: Timestamp, bytes: i64) {
        self.unresolved_intent_bytes += bytes;
        self.oldest_intent_nanos = Some(
            self.oldest_intent_nanos
                .map_or(timestamp.wall_time, |oldest| oldest.min(timestamp.wall_time)),
        );
    }

    fn record_gc(&mut self, result: GcResult) {
        self.report.gc_batches += 1;
        self.report.gc_versions_removed += result.versions_removed;
        self.report.gc_bytes_reclaimed += result.bytes_reclaimed;
        SCAN_GC_BYTES
            .with_label_values(&["reclaimed"])
            .inc_by(result.bytes_reclaimed.max(0) as u64);
    }

    fn record_gc_failure(&mut self, range_id: RangeId, key: &Key, bytes: i64, error: &CoreError) {
        tracing::warn!(range_id = %range_id, key = %key, error = %error, "Failed to collect key");
        SCAN_GC_BYTES
            .with_label_values(&["failed"])
            .inc_by(bytes.max(0) as u64);
        // Still collectable on the next pass.
        self.byte_counts[0] += bytes;
        self.retained_non_live_bytes += bytes;
        self.report.gc_failures += 1;
        self.note_error(error);
    }

    fn note_error(&mut self, error: &CoreError) {
        if self.first_error.is_none() {
            self.first_error = Some(error.to_string());
        }
    }
}

/// Executes scan passes.
pub struct ScanProcessor {
    gc_policy: GcPolicy,
    intent_age_threshold: Duration,
    gc_batch_size: usize,
    resolver: Arc<dyn IntentResolver>,
}

impl ScanProcessor {
    pub fn new(
        gc_policy: GcPolicy,
        intent_age_threshold: Duration,
        gc_batch_size: usize,
        resolver: Arc<dyn IntentResolver>,
    ) -> Self {
        Self {
            gc_policy,
            intent_age_threshold,
            gc_batch_size: gc_batch_size.max(1),
            resolver,
        }
    }

    pub fn gc_policy(&self) -> GcPolicy {
        self.gc_policy
    }

    /// Runs one pass over `range` as of `now`.
    ///
    /// # Errors
    ///
    /// Fatal errors are returned as they occur, with scan metadata untouched.
    /// [`CoreError::PartialScan`] is returned after metadata was updated when
    /// some keys could not be collected or resolved.
    pub async fn process<E: Engine>(
        &self,
        now: DateTime<Utc>,
        range: &Range<E>,
    ) -> CoreResult<ScanReport> {
        let now = Timestamp::from_datetime(now);
        let range_id = range.range_id();
        // Bounds may have changed since the range was scored.
        let desc = range.descriptor();

        let mut pass = ScanPass::new();
        if let Err(e) = self.traverse(now, range.engine().as_ref(), &desc, &mut pass) {
            if e.is_corruption() {
                SCAN_CHECKSUM_FAILURES
                    .with_label_values(&[SCAN_QUEUE_NAME])
                    .inc();
                tracing::error!(range_id = %range_id, error = %e, "Checksum verification failed");
            }
            return Err(e);
        }
        self.resolve_intents(range_id, &mut pass).await;

        let ttl_seconds = self.gc_policy.ttl_seconds();
        let non_live_bytes = pass.retained_non_live_bytes + pass.unresolved_intent_bytes;
        let ScanPass {
            report,
            byte_counts,
            oldest_intent_nanos,
            first_error,
            ..
        } = pass;
        range.update_scan_metadata(|meta| {
            meta.last_scan_nanos = now.wall_time;
            meta.gc.record(ttl_seconds, byte_counts, non_live_bytes);
            meta.oldest_intent_nanos = oldest_intent_nanos;
        });

        tracing::info!(
            range_id = %range_id,
            keys = report.keys_scanned,
            versions = report.versions_verified,
            gc_bytes = report.gc_bytes_reclaimed,
            intents_resolved = report.intents_resolved,
            "Scan pass complete"
        );

        if report.gc_failures > 0 || report.intent_failures > 0 {
            return Err(CoreError::PartialScan {
                range_id,
                gc_failures: report.gc_failures,
                intent_failures: report.intent_failures,
                first_error: first_error.unwrap_or_default(),
            });
        }
        Ok(report)
    }

    /// Walks the range once. The snapshot and iterator are released on return.
    fn traverse<E: Engine>(
        &self,
        now: Timestamp,
        engine: &E,
        desc: &RangeDescriptor,
        pass: &mut ScanPass,
    ) -> CoreResult<()> {
        let threshold = i64::try_from(self.intent_age_threshold.as_nanos()).unwrap_or(i64::MAX);
        let snapshot = engine.new_snapshot()?;

        for entry in snapshot.iter_range(&desc.start_key, &desc.end_key)? {
            let KeyVersions { key, versions } = entry?;
            pass.report.keys_scanned += 1;
            pass.report.versions_verified += versions.len();

            let decision = self
                .gc_policy
                .decide(now, &key, &versions, &mut pass.byte_counts);
            pass.retained_non_live_bytes += decision.retained_non_live_bytes;
            if let Some(timestamp) = decision.collect_through {
                pass.batch.push(GcKey {
                    key: key.clone(),
                    timestamp,
                });
                pass.batch_bytes.push(decision.collectable_bytes);
                if pass.batch.len() >= self.gc_batch_size {
                    self.flush_gc(engine, desc.range_id, pass);
                }
            }

            let intent = versions
                .first()
                .and_then(|v| v.txn.map(|txn| (txn, v.byte_size(&key))));
            if let Some((txn, bytes)) = intent {
                let age = now.wall_time.saturating_sub(txn.timestamp.wall_time);
                if age > threshold {
                    pass.abandoned.push(AbandonedIntent { key, txn, bytes });
                } else {
                    pass.report.intents_skipped += 1;
                    pass.keep_intent(txn.timestamp, bytes);
                }
            }
        }

        self.flush_gc(engine, desc.range_id, pass);
        Ok(())
    }

    /// Applies the pending batch. A failed batch is retried key by key so that
    /// only the keys that keep failing stay uncollected.
    fn flush_gc<E: Engine>(&self, engine: &E, range_id: RangeId, pass: &mut ScanPass) {
        if pass.batch.is_empty() {
            return;
        }
        let batch = std::mem::take(&mut pass.batch);
        let bytes = std::mem::take(&mut pass.batch_bytes);

        let err = match engine.gc(&batch) {
            Ok(result) => {
                pass.record_gc(result);
                return;
            }
            Err(e) => e,
        };
        if batch.len() == 1 {
            pass.record_gc_failure(range_id, &batch[0].key, bytes[0], &err);
            return;
        }

        tracing::debug!(range_id = %range_id, keys = batch.len(), error = %err, "GC batch failed, retrying per key");
        for (gc_key, key_bytes) in batch.iter().zip(bytes) {
            match engine.gc(std::slice::from_ref(gc_key)) {
                Ok(result) => pass.record_gc(result),
                Err(e) => pass.record_gc_failure(range_id, &gc_key.key, key_bytes, &e),
            }
        }
    }

    async fn resolve_intents(&self, range_id: RangeId, pass: &mut ScanPass) {
        for AbandonedIntent { key, txn, bytes } in std::mem::take(&mut pass.abandoned) {
            match self.resolver.resolve(&key, &txn).await {
                Ok(outcome) => {
                    SCAN_INTENTS.with_label_values(&["resolved"]).inc();
                    pass.report.intents_resolved += 1;
                    tracing::debug!(range_id = %range_id, key = %key, outcome = ?outcome, "Resolved abandoned intent");
                }
                Err(e) => {
                    SCAN_INTENTS.with_label_values(&["failed"]).inc();
                    tracing::warn!(range_id = %range_id, key = %key, error = %e, "Failed to resolve intent");
                    pass.report.intent_failures += 1;
                    pass.keep_intent(txn.timestamp, bytes);
                    pass.note_error(&e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use chrono::TimeZone;
    use rangekv_core::{ClusterId, NodeId, Replica, StoreId};
    use uuid::Uuid;

    use crate::engine::MemoryEngine;
    use crate::intent::{EngineIntentResolver, IntentOutcome, TxnRegistry};

    const SEC: i64 = 1_000_000_000;
    const HOUR: i64 = 3_600 * SEC;

    struct FailingResolver;

    #[async_trait]
    impl IntentResolver for FailingResolver {
        async fn resolve(&self, key: &Key, _intent: &TxnMeta) -> CoreResult<IntentOutcome> {
            Err(CoreError::storage(format!("cannot reach coordinator for {key}")))
        }
    }

    fn range() -> Range<MemoryEngine> {
        let range_id = RangeId::new(1);
        let desc = RangeDescriptor::new(
            range_id,
            Key::MIN,
            Key::MAX,
            vec![Replica::new(NodeId::new(1), StoreId::new(1), range_id)],
        );
        Range::new(ClusterId::new(), desc, Arc::new(MemoryEngine::new()), 10).unwrap()
    }

    fn processor(engine: &Arc<MemoryEngine>, batch_size: usize) -> (ScanProcessor, Arc<TxnRegistry>) {
        let registry = Arc::new(TxnRegistry::new());
        let resolver = EngineIntentResolver::new(Arc::clone(engine), registry.clone());
        let processor = ScanProcessor::new(
            GcPolicy::new(10),
            Duration::from_secs(3_600),
            batch_size,
            Arc::new(resolver),
        );
        (processor, registry)
    }

    fn at(nanos: i64) -> DateTime<Utc> {
        Utc.timestamp_nanos(nanos)
    }

    #[tokio::test]
    async fn test_pass_collects_expired_versions_and_updates_metadata() {
        let range = range();
        let engine = Arc::clone(range.engine());
        let (processor, _) = processor(&engine, 1);
        for key in ["a", "b", "c"] {
            engine.put(&Key::from(key), Timestamp::from_nanos(SEC), Bytes::from("old")).unwrap();
            engine.put(&Key::from(key), Timestamp::from_nanos(2 * SEC), Bytes::from("new")).unwrap();
        }

        let now = 100 * SEC;
        let report = processor.process(at(now), &range).await.unwrap();
        assert_eq!(report.keys_scanned, 3);
        assert_eq!(report.versions_verified, 6);
        assert_eq!(report.gc_batches, 3);
        assert_eq!(report.gc_versions_removed, 3);
        assert_eq!(engine.versions(&Key::from("a")).len(), 1);

        let meta = range.scan_metadata();
        assert_eq!(meta.last_scan_nanos, now);
        assert_eq!(meta.gc.byte_counts, vec![0; GC_BUCKETS]);
        assert_eq!(meta.gc.non_live_bytes, 0);
        assert_eq!(meta.oldest_intent_nanos, None);
        assert_eq!(engine.open_snapshots(), 0);
        assert_eq!(engine.open_iterators(), 0);
    }

    #[tokio::test]
    async fn test_retained_garbage_is_bucketed() {
        let range = range();
        let engine = Arc::clone(range.engine());
        let (processor, _) = processor(&engine, 16);
        let key = Key::from("k");
        engine.put(&key, Timestamp::from_nanos(SEC), Bytes::from("old")).unwrap();
        engine.put(&key, Timestamp::from_nanos(5 * SEC), Bytes::from("new")).unwrap();

        // Shadowed at 5s, collectable at 15s: 7s away from now(8s), bucket 7 of a 10s TTL.
        processor.process(at(8 * SEC), &range).await.unwrap();
        let meta = range.scan_metadata();
        let size = engine.versions(&key)[1].byte_size(&key);
        assert_eq!(meta.gc.byte_counts[7], size);
        assert_eq!(meta.gc.non_live_bytes, size);
    }

    #[tokio::test]
    async fn test_young_intents_are_left_alone() {
        let range = range();
        let engine = Arc::clone(range.engine());
        let (processor, registry) = processor(&engine, 16);
        let txn = TxnMeta {
            txn_id: Uuid::new_v4(),
            timestamp: Timestamp::from_nanos(HOUR),
        };
        registry.begin(txn.txn_id);
        engine.put_intent(&Key::from("k"), txn, Some(Bytes::from("v"))).unwrap();

        let report = processor.process(at(HOUR + 60 * SEC), &range).await.unwrap();
        assert_eq!(report.intents_skipped, 1);
        assert_eq!(report.intents_resolved, 0);
        assert!(engine.versions(&Key::from("k"))[0].is_intent());
        assert_eq!(range.scan_metadata().oldest_intent_nanos, Some(HOUR));
    }

    #[tokio::test]
    async fn test_intent_exactly_at_threshold_is_left_alone() {
        let range = range();
        let engine = Arc::clone(range.engine());
        let (processor, registry) = processor(&engine, 16);
        let txn = TxnMeta {
            txn_id: Uuid::new_v4(),
            timestamp: Timestamp::from_nanos(SEC),
        };
        registry.begin(txn.txn_id);
        engine.put_intent(&Key::from("k"), txn, Some(Bytes::from("v"))).unwrap();

        let report = processor.process(at(SEC + HOUR), &range).await.unwrap();
        assert_eq!(report.intents_skipped, 1);
        assert!(engine.versions(&Key::from("k"))[0].is_intent());

        let report = processor.process(at(SEC + HOUR + 1), &range).await.unwrap();
        assert_eq!(report.intents_resolved, 1);
        assert!(engine.versions(&Key::from("k")).is_empty());
    }

    #[tokio::test]
    async fn test_abandoned_intents_are_resolved() {
        let range = range();
        let engine = Arc::clone(range.engine());
        let (processor, registry) = processor(&engine, 16);
        let committed = TxnMeta {
            txn_id: Uuid::new_v4(),
            timestamp: Timestamp::from_nanos(SEC),
        };
        let pending = TxnMeta {
            txn_id: Uuid::new_v4(),
            timestamp: Timestamp::from_nanos(2 * SEC),
        };
        registry.commit(committed.txn_id, Timestamp::from_nanos(3 * SEC));
        registry.begin(pending.txn_id);
        engine.put_intent(&Key::from("a"), committed, Some(Bytes::from("v"))).unwrap();
        engine.put_intent(&Key::from("b"), pending, Some(Bytes::from("v"))).unwrap();

        let report = processor.process(at(2 * HOUR), &range).await.unwrap();
        assert_eq!(report.intents_resolved, 2);
        assert_eq!(
            engine.get(&Key::from("a"), Timestamp::from_nanos(3 * SEC)).unwrap(),
            Some(Bytes::from("v"))
        );
        assert!(engine.versions(&Key::from("b")).is_empty());
        assert_eq!(range.scan_metadata().oldest_intent_nanos, None);
    }

    #[tokio::test]
    async fn test_intent_failures_are_soft() {
        let range = range();
        let engine = Arc::clone(range.engine());
        let processor = ScanProcessor::new(
            GcPolicy::new(10),
            Duration::from_secs(3_600),
            16,
            Arc::new(FailingResolver),
        );
        let txn = TxnMeta {
            txn_id: Uuid::new_v4(),
            timestamp: Timestamp::from_nanos(SEC),
        };
        engine.put_intent(&Key::from("k"), txn, Some(Bytes::from("v"))).unwrap();

        let err = processor.process(at(2 * HOUR), &range).await.unwrap_err();
        assert!(matches!(
            err,
            CoreError::PartialScan {
                gc_failures: 0,
                intent_failures: 1,
                ..
            }
        ));
        let meta = range.scan_metadata();
        assert_eq!(meta.last_scan_nanos, 2 * HOUR);
        assert_eq!(meta.oldest_intent_nanos, Some(SEC));
    }

    #[tokio::test]
    async fn test_snapshot_failure_aborts_without_metadata_update() {
        let range = range();
        let engine = Arc::clone(range.engine());
        let (processor, _) = processor(&engine, 16);
        engine.fail_snapshots(true);

        assert!(processor.process(at(HOUR), &range).await.is_err());
        assert_eq!(range.scan_metadata().last_scan_nanos, 0);
        assert_eq!(engine.open_snapshots(), 0);
    }

    #[tokio::test]
    async fn test_failed_batch_only_charges_failing_keys() {
        let range = range();
        let engine = Arc::clone(range.engine());
        let (processor, _) = processor(&engine, 256);
        for key in ["a", "b", "c", "d"] {
            engine.put(&Key::from(key), Timestamp::from_nanos(SEC), Bytes::from("old")).unwrap();
            engine.put(&Key::from(key), Timestamp::from_nanos(2 * SEC), Bytes::from("new")).unwrap();
        }
        engine.fail_gc_for_key(Key::from("b"));

        let err = processor.process(at(100 * SEC), &range).await.unwrap_err();
        match err {
            CoreError::PartialScan {
                gc_failures,
                intent_failures,
                ..
            } => {
                assert_eq!(gc_failures, 1);
                assert_eq!(intent_failures, 0);
            }
            other => panic!("expected partial scan, got {other}"),
        }

        for key in ["a", "c", "d"] {
            assert_eq!(engine.versions(&Key::from(key)).len(), 1, "key {key}");
        }
        let stuck = engine.versions(&Key::from("b"));
        assert_eq!(stuck.len(), 2);

        let meta = range.scan_metadata();
        assert_eq!(meta.gc.byte_counts[0], stuck[1].byte_size(&Key::from("b")));
        assert_eq!(meta.gc.non_live_bytes, meta.gc.byte_counts[0]);
    }
}
