use std::sync::Arc;

use parking_lot::RwLock;

use rangekv_core::{
    ClusterId, CoreResult, RangeDescriptor, RangeId, RangeMetadata, ScanMetadata,
};

use crate::engine::Engine;
use crate::queue::Queueable;

/// A locally hosted range: its metadata, scan bookkeeping and storage engine.
///
/// Scan metadata is only reachable through [`scan_metadata`](Self::scan_metadata)
/// and [`update_scan_metadata`](Self::update_scan_metadata); updates happen under
/// the write lock so a concurrent reader sees either the old or the new value.
pub struct Range<E: Engine> {
    range_id: RangeId,
    meta: RwLock<RangeMetadata>,
    scan_meta: RwLock<ScanMetadata>,
    engine: Arc<E>,
}

impl<E: Engine> Range<E> {
    /// Creates a range and starts statistics tracking for its bounds.
    ///
    /// # Errors
    ///
    /// Returns the descriptor's validation error or the engine's tracking error.
    pub fn new(
        cluster_id: ClusterId,
        desc: RangeDescriptor,
        engine: Arc<E>,
        gc_ttl_seconds: i64,
    ) -> CoreResult<Self> {
        desc.validate()?;
        engine.track_range(&desc)?;

        Ok(Self {
            range_id: desc.range_id,
            meta: RwLock::new(RangeMetadata::new(cluster_id, desc)),
            scan_meta: RwLock::new(ScanMetadata::new(gc_ttl_seconds)),
            engine,
        })
    }

    pub fn range_id(&self) -> RangeId {
        self.range_id
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Current descriptor. May be replaced at any time; callers must not cache it
    /// across scheduling decisions.
    pub fn descriptor(&self) -> RangeDescriptor {
        self.meta.read().desc.clone()
    }

    pub fn metadata(&self) -> RangeMetadata {
        self.meta.read().clone()
    }

    /// Atomically installs a new descriptor for this range.
    ///
    /// # Errors
    ///
    /// Fails if the descriptor is invalid, names another range, or the engine
    /// rejects the new bounds.
    pub fn replace_descriptor(&self, desc: RangeDescriptor) -> CoreResult<()> {
        let mut meta = self.meta.write();
        let mut updated = meta.clone();
        updated.replace_descriptor(desc)?;
        self.engine.track_range(&updated.desc)?;
        *meta = updated;
        Ok(())
    }

    /// Consistent copy of the scan metadata.
    pub fn scan_metadata(&self) -> ScanMetadata {
        self.scan_meta.read().clone()
    }

    /// Applies `update` to the scan metadata under the write lock.
    pub fn update_scan_metadata(&self, update: impl FnOnce(&mut ScanMetadata)) {
        let mut meta = self.scan_meta.write();
        update(&mut *meta);
    }
}

impl<E: Engine> Queueable for Range<E> {
    fn queue_id(&self) -> RangeId {
        self.range_id
    }
}

impl<E: Engine> std::fmt::Debug for Range<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Range")
            .field("range_id", &self.range_id)
            .field("desc", &self.meta.read().desc)
            .finish_non_exhaustive()
    }
}
