//! Range descriptors: key boundaries and replica placement of each shard.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::ids::{ClusterId, NodeId, RangeId, StoreId};
use crate::key::Key;

/// One stored copy of a range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Replica {
    /// Node hosting the replica.
    pub node_id: NodeId,
    /// Store on that node holding the replica's data.
    pub store_id: StoreId,
    /// Range the replica belongs to.
    pub range_id: RangeId,
    /// Free-form placement attributes (e.g. `"dc1"`, `"ssd"`).
    #[serde(default)]
    pub attrs: Vec<String>,
}

impl Replica {
    /// Creates a replica without attributes.
    #[must_use]
    pub fn new(node_id: NodeId, store_id: StoreId, range_id: RangeId) -> Self {
        Self {
            node_id,
            store_id,
            range_id,
            attrs: Vec::new(),
        }
    }

    /// Adds placement attributes.
    #[must_use]
    pub fn with_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs.extend(attrs.into_iter().map(Into::into));
        self
    }

    /// Returns true if the replica carries the given attribute.
    #[must_use]
    pub fn has_attribute(&self, attr: &str) -> bool {
        self.attrs.iter().any(|a| a == attr)
    }
}

/// Authoritative boundary and placement record for one range.
///
/// Covers `[start_key, end_key)`. A descriptor is replaced as a whole when
/// replicas change or the range splits or merges; it is never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    /// Range identifier.
    pub range_id: RangeId,
    /// Inclusive start key.
    pub start_key: Key,
    /// Exclusive end key.
    pub end_key: Key,
    /// Replicas of the range, in placement order.
    pub replicas: Vec<Replica>,
}

impl RangeDescriptor {
    /// Creates a descriptor. Call [`validate`](Self::validate) before trusting it.
    #[must_use]
    pub fn new(range_id: RangeId, start_key: Key, end_key: Key, replicas: Vec<Replica>) -> Self {
        Self {
            range_id,
            start_key,
            end_key,
            replicas,
        }
    }

    /// Checks the descriptor's structural invariants.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if the bounds are inverted or empty, the replica
    /// set is empty, a replica names a different range, or a store appears twice.
    pub fn validate(&self) -> CoreResult<()> {
        if self.start_key >= self.end_key {
            return Err(CoreError::ValidationError(format!(
                "range {}: start key {} must sort before end key {}",
                self.range_id, self.start_key, self.end_key
            )));
        }
        if self.end_key > Key::MAX {
            return Err(CoreError::ValidationError(format!(
                "range {}: end key {} exceeds the key space",
                self.range_id, self.end_key
            )));
        }
        if self.replicas.is_empty() {
            return Err(CoreError::ValidationError(format!(
                "range {} has no replicas",
                self.range_id
            )));
        }

        let mut stores = HashSet::with_capacity(self.replicas.len());
        for replica in &self.replicas {
            if replica.range_id != self.range_id {
                return Err(CoreError::ValidationError(format!(
                    "replica on store {} names range {}, expected {}",
                    replica.store_id, replica.range_id, self.range_id
                )));
            }
            if !stores.insert((replica.node_id, replica.store_id)) {
                return Err(CoreError::ValidationError(format!(
                    "range {} lists store {} on node {} twice",
                    self.range_id, replica.store_id, replica.node_id
                )));
            }
        }
        Ok(())
    }

    /// Returns true if `key` falls inside `[start_key, end_key)`.
    #[must_use]
    pub fn contains_key(&self, key: &Key) -> bool {
        &self.start_key <= key && key < &self.end_key
    }

    /// Returns true if `[start, end)` lies entirely inside the range.
    #[must_use]
    pub fn contains_key_range(&self, start: &Key, end: &Key) -> bool {
        start < end && &self.start_key <= start && end <= &self.end_key
    }

    /// Finds the replica stored on `store_id`.
    #[must_use]
    pub fn find_replica(&self, store_id: StoreId) -> Option<&Replica> {
        self.replicas.iter().find(|r| r.store_id == store_id)
    }
}

/// Checks that `descriptors` tile `[Key::MIN, Key::MAX)` without gaps or overlaps.
///
/// The slice may be in any order.
///
/// # Errors
///
/// Returns `ValidationError` naming the first gap, overlap or invalid descriptor.
pub fn validate_coverage(descriptors: &[RangeDescriptor]) -> CoreResult<()> {
    let mut sorted: Vec<&RangeDescriptor> = descriptors.iter().collect();
    sorted.sort_by(|a, b| a.start_key.cmp(&b.start_key));

    let mut expected_start = Key::MIN;
    for desc in sorted {
        desc.validate()?;
        if desc.start_key != expected_start {
            let kind = if desc.start_key > expected_start {
                "gap"
            } else {
                "overlap"
            };
            return Err(CoreError::ValidationError(format!(
                "{kind} before range {}: expected start {}, found {}",
                desc.range_id, expected_start, desc.start_key
            )));
        }
        expected_start = desc.end_key.clone();
    }

    if expected_start != Key::MAX {
        return Err(CoreError::ValidationError(format!(
            "key space not covered past {expected_start}"
        )));
    }
    Ok(())
}

/// Range descriptor plus the cluster it belongs to.
///
/// The range id is stored twice so lookups do not need to decode the descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeMetadata {
    /// Cluster owning the range.
    pub cluster_id: ClusterId,
    /// Copy of `desc.range_id`.
    pub range_id: RangeId,
    /// Current descriptor.
    pub desc: RangeDescriptor,
}

impl RangeMetadata {
    /// Wraps a descriptor, copying its range id.
    #[must_use]
    pub fn new(cluster_id: ClusterId, desc: RangeDescriptor) -> Self {
        Self {
            cluster_id,
            range_id: desc.range_id,
            desc,
        }
    }

    /// Installs a replacement descriptor for the same range.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the descriptor belongs to another range, or the
    /// descriptor's own validation error.
    pub fn replace_descriptor(&mut self, desc: RangeDescriptor) -> CoreResult<()> {
        if desc.range_id != self.range_id {
            return Err(CoreError::invalid_state(format!(
                "descriptor for range {} cannot replace range {}",
                desc.range_id, self.range_id
            )));
        }
        desc.validate()?;
        self.desc = desc;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desc(id: u64, start: Key, end: Key) -> RangeDescriptor {
        let range_id = RangeId::new(id);
        RangeDescriptor::new(
            range_id,
            start,
            end,
            vec![
                Replica::new(NodeId::new(1), StoreId::new(1), range_id),
                Replica::new(NodeId::new(2), StoreId::new(1), range_id).with_attrs(["ssd"]),
            ],
        )
    }

    #[test]
    fn test_validate_accepts_well_formed_descriptor() {
        assert!(desc(1, Key::from("a"), Key::from("m")).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        assert!(desc(1, Key::from("m"), Key::from("a")).validate().is_err());
        assert!(desc(1, Key::from("m"), Key::from("m")).validate().is_err());
    }

    #[test]
    fn test_validate_rejects_foreign_and_duplicate_replicas() {
        let mut d = desc(1, Key::from("a"), Key::from("b"));
        d.replicas[1].range_id = RangeId::new(9);
        assert!(d.validate().is_err());

        let mut d = desc(1, Key::from("a"), Key::from("b"));
        d.replicas[1].node_id = NodeId::new(1);
        assert!(d.validate().is_err());

        let mut d = desc(1, Key::from("a"), Key::from("b"));
        d.replicas.clear();
        assert!(d.validate().is_err());
    }

    #[test]
    fn test_contains_key_is_end_exclusive() {
        let d = desc(1, Key::from("b"), Key::from("d"));
        assert!(d.contains_key(&Key::from("b")));
        assert!(d.contains_key(&Key::from("c")));
        assert!(!d.contains_key(&Key::from("d")));
        assert!(!d.contains_key(&Key::from("a")));
        assert!(d.contains_key_range(&Key::from("b"), &Key::from("d")));
        assert!(!d.contains_key_range(&Key::from("c"), &Key::from("e")));
    }

    #[test]
    fn test_find_replica_and_attributes() {
        let d = desc(1, Key::from("a"), Key::from("b"));
        let replica = d.find_replica(StoreId::new(1)).unwrap();
        assert_eq!(replica.node_id, NodeId::new(1));
        assert!(!replica.has_attribute("ssd"));
        assert!(d.replicas[1].has_attribute("ssd"));
        assert!(d.find_replica(StoreId::new(5)).is_none());
    }

    #[test]
    fn test_validate_coverage() {
        let tiles = vec![
            desc(2, Key::from("m"), Key::MAX),
            desc(1, Key::MIN, Key::from("m")),
        ];
        assert!(validate_coverage(&tiles).is_ok());

        let gap = vec![
            desc(1, Key::MIN, Key::from("k")),
            desc(2, Key::from("m"), Key::MAX),
        ];
        assert!(validate_coverage(&gap).is_err());

        let overlap = vec![
            desc(1, Key::MIN, Key::from("n")),
            desc(2, Key::from("m"), Key::MAX),
        ];
        assert!(validate_coverage(&overlap).is_err());

        let short = vec![desc(1, Key::MIN, Key::from("m"))];
        assert!(validate_coverage(&short).is_err());
    }

    #[test]
    fn test_replace_descriptor_keeps_range_identity() {
        let mut meta = RangeMetadata::new(ClusterId::new(), desc(3, Key::MIN, Key::MAX));
        assert_eq!(meta.range_id, RangeId::new(3));

        let mut replacement = desc(3, Key::MIN, Key::MAX);
        replacement.replicas.pop();
        meta.replace_descriptor(replacement).unwrap();
        assert_eq!(meta.desc.replicas.len(), 1);

        assert!(meta
            .replace_descriptor(desc(4, Key::MIN, Key::MAX))
            .is_err());
    }
}
