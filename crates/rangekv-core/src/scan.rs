//! Per-range maintenance bookkeeping read by the scan scorer and written by scan passes.

use serde::{Deserialize, Serialize};

/// Number of expiration buckets kept by [`GcMetadata`].
pub const GC_BUCKETS: usize = 10;

/// Default retention window for superseded versions (24 hours).
pub const DEFAULT_GC_TTL_SECONDS: i64 = 24 * 60 * 60;

const NANOS_PER_SECOND: i128 = 1_000_000_000;

/// Estimator of how many non-live bytes become collectable as time passes.
///
/// A scan pass records, for the non-live versions it had to leave behind,
/// how long until each one passes the GC TTL. `byte_counts[i]` holds the bytes
/// expiring within `[i, i + 1) * ttl / GC_BUCKETS` after that pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcMetadata {
    /// GC TTL in force when the buckets were recorded.
    pub ttl_seconds: i64,
    /// Bytes left behind by the last pass, bucketed by time to expiration.
    /// Empty until the first pass completes.
    #[serde(default)]
    pub byte_counts: Vec<i64>,
    /// Non-live bytes the range held when the last pass completed.
    #[serde(default)]
    pub non_live_bytes: i64,
}

impl Default for GcMetadata {
    fn default() -> Self {
        Self::new(DEFAULT_GC_TTL_SECONDS)
    }
}

impl GcMetadata {
    /// Creates an estimator that has not observed any pass yet.
    #[must_use]
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            ttl_seconds,
            byte_counts: Vec::new(),
            non_live_bytes: 0,
        }
    }

    /// Estimates the bytes collectable `elapsed_nanos` after the last pass,
    /// given the range currently holds `non_live_bytes` non-live bytes.
    ///
    /// Before the first pass every non-live byte is presumed collectable and
    /// `non_live_bytes` is returned unchanged.
    #[must_use]
    pub fn estimated_bytes(&self, elapsed_nanos: i64, non_live_bytes: i64) -> i64 {
        if self.byte_counts.is_empty() {
            return non_live_bytes;
        }

        let ttl_nanos = self.ttl_nanos();
        let elapsed = i128::from(elapsed_nanos.max(0)).min(ttl_nanos);
        let buckets = self.byte_counts.len() as i128;
        // Bucket i is fully expired once (i + 1) / buckets of the TTL has passed.
        let expired = (elapsed * buckets / ttl_nanos) as usize;
        let mut estimate: i64 = self.byte_counts[..expired].iter().sum();

        // Garbage created after the pass is assumed to be spread evenly over the TTL.
        let growth = (non_live_bytes - self.non_live_bytes).max(0);
        estimate += (i128::from(growth) * elapsed / ttl_nanos) as i64;

        estimate.min(non_live_bytes.max(0))
    }

    /// Replaces the estimator state with the findings of a completed pass.
    pub fn record(&mut self, ttl_seconds: i64, byte_counts: Vec<i64>, non_live_bytes: i64) {
        self.ttl_seconds = ttl_seconds;
        self.byte_counts = byte_counts;
        self.non_live_bytes = non_live_bytes;
    }

    /// Bucket for a version that becomes collectable `until_expiration_nanos`
    /// from now under a TTL of `ttl_seconds`.
    #[must_use]
    pub fn bucket_index(until_expiration_nanos: i64, ttl_seconds: i64) -> usize {
        let ttl_nanos = i128::from(ttl_seconds.max(1)) * NANOS_PER_SECOND;
        let delay = i128::from(until_expiration_nanos.max(0));
        ((delay * GC_BUCKETS as i128 / ttl_nanos) as usize).min(GC_BUCKETS - 1)
    }

    fn ttl_nanos(&self) -> i128 {
        i128::from(self.ttl_seconds.max(1)) * NANOS_PER_SECOND
    }
}

/// Scan bookkeeping owned by one range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanMetadata {
    /// Completion time of the last successful pass, in nanoseconds since the
    /// Unix epoch. Zero for a range that was never scanned.
    pub last_scan_nanos: i64,
    /// GC byte estimator.
    #[serde(default)]
    pub gc: GcMetadata,
    /// Timestamp of the oldest intent the last pass saw but did not resolve.
    #[serde(default)]
    pub oldest_intent_nanos: Option<i64>,
}

impl ScanMetadata {
    /// Metadata for a freshly created range.
    #[must_use]
    pub fn new(gc_ttl_seconds: i64) -> Self {
        Self {
            last_scan_nanos: 0,
            gc: GcMetadata::new(gc_ttl_seconds),
            oldest_intent_nanos: None,
        }
    }

    /// Nanoseconds between the last pass and `now_nanos`.
    #[must_use]
    pub const fn elapsed_nanos(&self, now_nanos: i64) -> i64 {
        now_nanos.saturating_sub(self.last_scan_nanos)
    }
}
