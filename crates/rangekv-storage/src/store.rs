//! Store: the set of ranges hosted by one store on one node.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use rangekv_core::{ClusterId, CoreError, CoreResult, NodeId, RangeDescriptor, RangeId, StoreId};

use crate::engine::Engine;
use crate::queue::ItemSource;
use crate::range::Range;

/// Ranges hosted by one store, all sharing one engine.
pub struct Store<E: Engine> {
    cluster_id: ClusterId,
    node_id: NodeId,
    store_id: StoreId,
    engine: Arc<E>,
    gc_ttl_seconds: i64,
    ranges: RwLock<BTreeMap<RangeId, Arc<Range<E>>>>,
}

impl<E: Engine> Store<E> {
    pub fn new(
        cluster_id: ClusterId,
        node_id: NodeId,
        store_id: StoreId,
        engine: Arc<E>,
        gc_ttl_seconds: i64,
    ) -> Self {
        Self {
            cluster_id,
            node_id,
            store_id,
            engine,
            gc_ttl_seconds,
            ranges: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.cluster_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn store_id(&self) -> StoreId {
        self.store_id
    }

    pub fn engine(&self) -> &Arc<E> {
        &self.engine
    }

    /// Starts hosting a range. The descriptor must list a replica on this store.
    ///
    /// # Errors
    ///
    /// Fails if the range is already hosted, the descriptor is invalid or does
    /// not place a replica here, or the engine rejects its bounds.
    pub fn add_range(&self, desc: RangeDescriptor) -> CoreResult<Arc<Range<E>>> {
        let range_id = desc.range_id;
        let placed_here = desc
            .find_replica(self.store_id)
            .is_some_and(|replica| replica.node_id == self.node_id);
        if !placed_here {
            return Err(CoreError::invalid_state(format!(
                "range {range_id} has no replica on node {} store {}",
                self.node_id, self.store_id
            )));
        }

        let mut ranges = self.ranges.write();
        if ranges.contains_key(&range_id) {
            return Err(CoreError::already_exists("range", range_id.to_string()));
        }
        let range = Arc::new(Range::new(
            self.cluster_id,
            desc,
            Arc::clone(&self.engine),
            self.gc_ttl_seconds,
        )?);
        ranges.insert(range_id, Arc::clone(&range));

        tracing::debug!(range_id = %range_id, store_id = %self.store_id, "Added range");
        Ok(range)
    }

    /// Stops hosting a range.
    pub fn remove_range(&self, range_id: RangeId) -> Option<Arc<Range<E>>> {
        let removed = self.ranges.write().remove(&range_id);
        if removed.is_some() {
            self.engine.untrack_range(range_id);
            tracing::debug!(range_id = %range_id, store_id = %self.store_id, "Removed range");
        }
        removed
    }

    pub fn get_range(&self, range_id: RangeId) -> Option<Arc<Range<E>>> {
        self.ranges.read().get(&range_id).cloned()
    }

    /// Hosted ranges in range id order.
    pub fn ranges(&self) -> Vec<Arc<Range<E>>> {
        self.ranges.read().values().cloned().collect()
    }

    pub fn range_count(&self) -> usize {
        self.ranges.read().len()
    }

    /// Installs a new descriptor for a hosted range.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for an unknown range, otherwise the range's own
    /// replacement error.
    pub fn replace_descriptor(&self, desc: RangeDescriptor) -> CoreResult<()> {
        let range = self
            .get_range(desc.range_id)
            .ok_or_else(|| CoreError::not_found("range", desc.range_id.to_string()))?;
        range.replace_descriptor(desc)
    }
}

impl<E: Engine> ItemSource<Range<E>> for Store<E> {
    fn items(&self) -> Vec<Arc<Range<E>>> {
        self.ranges()
    }
}
