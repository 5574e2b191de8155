//! Versioned storage engine seam consumed by range maintenance.
//!
//! The engine owns snapshots, checksummed version storage and per-range
//! statistics. [`MemoryEngine`] is the in-process implementation.

mod memory;
mod version;

use rangekv_core::{CoreResult, Key, RangeDescriptor, RangeId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use memory::{MemoryEngine, MemoryRangeIter, MemorySnapshot};
pub use version::{KeyVersions, MvccStats, MvccVersion, TxnMeta, VERSION_OVERHEAD_BYTES};

/// Per-range statistic maintained by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeStat {
    LiveBytes,
    IntentBytes,
    LiveCount,
    IntentCount,
}

impl RangeStat {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::LiveBytes => "live_bytes",
            Self::IntentBytes => "intent_bytes",
            Self::LiveCount => "live_count",
            Self::IntentCount => "intent_count",
        }
    }
}

/// Request to drop every committed version of `key` at or below `timestamp`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GcKey {
    pub key: Key,
    pub timestamp: Timestamp,
}

/// Outcome of one applied GC batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcResult {
    pub keys: usize,
    pub versions_removed: usize,
    pub bytes_reclaimed: i64,
}

/// Storage engine operations used by range maintenance.
pub trait Engine: Send + Sync + 'static {
    type Snapshot: Snapshot;

    /// Opens a point-in-time, read-consistent view of the whole engine.
    /// Resources are released when the snapshot is dropped.
    fn new_snapshot(&self) -> CoreResult<Self::Snapshot>;

    /// Starts (or re-bounds) statistics tracking for a range.
    fn track_range(&self, desc: &RangeDescriptor) -> CoreResult<()>;

    /// Stops statistics tracking for a range. Data is left in place.
    fn untrack_range(&self, range_id: RangeId);

    /// Total bytes stored for the range, every version included.
    fn range_size(&self, range_id: RangeId) -> CoreResult<i64>;

    /// One statistic of the range. Never traverses data.
    fn range_stat(&self, range_id: RangeId, stat: RangeStat) -> CoreResult<i64>;

    /// Applies a GC batch atomically: either every key is collected or none.
    fn gc(&self, keys: &[GcKey]) -> CoreResult<GcResult>;

    /// Commits the intent of `txn_id` on `key` at `commit_ts`, or removes it when
    /// `commit_ts` is `None`. Does nothing if the key holds no intent of that
    /// transaction.
    fn resolve_intent(
        &self,
        key: &Key,
        txn_id: Uuid,
        commit_ts: Option<Timestamp>,
    ) -> CoreResult<()>;
}

/// Point-in-time view of engine data.
pub trait Snapshot: Send + Sync {
    type Iter<'a>: Iterator<Item = CoreResult<KeyVersions>> + Send
    where
        Self: 'a;

    /// Iterates keys in `[start, end)` in key order. Every version is checksum
    /// verified as it is read; a mismatch ends the iteration with an error.
    fn iter_range(&self, start: &Key, end: &Key) -> CoreResult<Self::Iter<'_>>;
}
