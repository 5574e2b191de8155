//! Range scan queue
//!
//! Periodically scans every range to collect expired versions, resolve
//! abandoned write intents and verify stored checksums. The three concerns
//! age independently and are folded into one admission priority by the
//! [scorer](score_range); admitted ranges are scanned by the
//! [`ScanProcessor`] in a single snapshot traversal.

mod processor;
mod scorer;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use rangekv_core::{CoreResult, ScanQueueConfig};

use crate::engine::Engine;
use crate::gc::GcPolicy;
use crate::intent::IntentResolver;
use crate::queue::{BaseQueue, QueueImpl};
use crate::range::Range;

pub use processor::{ScanProcessor, ScanReport};
pub use scorer::{compute_priority, score_range, ScanPriority};

/// Name the scan queue is registered under.
pub const SCAN_QUEUE_NAME: &str = "scan";

/// Maximum number of ranges pending a scan.
pub const SCAN_QUEUE_MAX_SIZE: usize = 100;

/// Estimated collectable bytes worth one unit of priority.
pub const GC_BYTE_COUNT_NORMALIZATION: i64 = 1 << 20;

/// Target interval between intent sweeps of a range holding intents.
pub const INTENT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 24 * 60 * 60);

/// Target interval between checksum verifications of a range.
pub const VERIFICATION_INTERVAL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Binds the scan scorer and processor to a [`BaseQueue`].
pub struct ScanQueue<E: Engine> {
    processor: ScanProcessor,
    _engine: PhantomData<fn() -> E>,
}

impl<E: Engine> ScanQueue<E> {
    pub fn new(processor: ScanProcessor) -> Self {
        Self {
            processor,
            _engine: PhantomData,
        }
    }

    pub fn processor(&self) -> &ScanProcessor {
        &self.processor
    }
}

#[async_trait]
impl<E: Engine> QueueImpl<Range<E>> for ScanQueue<E> {
    fn should_queue(&self, now: DateTime<Utc>, range: &Range<E>) -> (bool, f64) {
        let score = score_range(now, range);
        tracing::trace!(
            range_id = %range.range_id(),
            gc = score.gc_score,
            intent = score.intent_score,
            verify = score.verify_score,
            priority = score.priority,
            "Scored range"
        );
        (score.should_queue(), score.priority)
    }

    async fn process(&self, now: DateTime<Utc>, range: &Range<E>) -> CoreResult<()> {
        self.processor.process(now, range).await.map(|_| ())
    }
}

/// Creates the scan queue for ranges stored in engine `E`.
pub fn new_scan_queue<E: Engine>(
    config: &ScanQueueConfig,
    resolver: Arc<dyn IntentResolver>,
) -> BaseQueue<Range<E>> {
    let processor = ScanProcessor::new(
        GcPolicy::new(config.gc_ttl_seconds),
        config.intent_age_threshold(),
        config.gc_batch_size,
        resolver,
    );
    BaseQueue::new(
        SCAN_QUEUE_NAME,
        Arc::new(ScanQueue::<E>::new(processor)),
        SCAN_QUEUE_MAX_SIZE,
    )
}
