//! In-memory MVCC engine

use std::collections::{btree_map, BTreeMap, HashMap, HashSet};
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use uuid::Uuid;

use rangekv_core::{CoreError, CoreResult, Key, RangeDescriptor, RangeId, Timestamp};

use super::version::{committed_versions, KeyVersions, MvccStats, MvccVersion, TxnMeta};
use super::{Engine, GcKey, GcResult, RangeStat, Snapshot};

type VersionMap = BTreeMap<Key, Vec<MvccVersion>>;

/// Bounds and running statistics of tracked ranges.
#[derive(Debug, Default)]
struct RangeIndex {
    /// start key -> (end key, range)
    bounds: BTreeMap<Key, (Key, RangeId)>,
    stats: HashMap<RangeId, MvccStats>,
}

impl RangeIndex {
    fn owner(&self, key: &Key) -> Option<RangeId> {
        self.bounds
            .range::<Key, _>(..=key)
            .next_back()
            .filter(|(_, (end, _))| key < end)
            .map(|(_, (_, range_id))| *range_id)
    }

    fn apply(&mut self, key: &Key, delta: MvccStats) {
        if let Some(range_id) = self.owner(key) {
            *self.stats.entry(range_id).or_default() += delta;
        }
    }

    fn stats(&self, range_id: RangeId) -> CoreResult<MvccStats> {
        self.stats
            .get(&range_id)
            .copied()
            .ok_or_else(|| CoreError::not_found("range", range_id.to_string()))
    }
}

/// Injected failures, for exercising error paths. Only settable with the
/// `testing` feature.
#[derive(Debug, Default)]
struct Faults {
    snapshot: AtomicBool,
    range_size: AtomicBool,
    stats: Mutex<HashSet<RangeStat>>,
    gc_keys: Mutex<HashSet<Key>>,
}

/// Counts a live resource until dropped.
#[derive(Debug)]
struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
    fn acquire(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory MVCC engine.
///
/// Data lives in a copy-on-write `BTreeMap`: a snapshot shares the current map
/// and the first write after it clones the map, so snapshots never block
/// writers and never observe them.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    data: RwLock<Arc<VersionMap>>,
    ranges: RwLock<RangeIndex>,
    faults: Faults,
    open_snapshots: Arc<AtomicUsize>,
    open_iterators: Arc<AtomicUsize>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Writes a committed value.
    ///
    /// # Errors
    ///
    /// Fails if the key holds an unresolved intent or lies outside the key space.
    pub fn put(&self, key: &Key, timestamp: Timestamp, value: impl Into<Bytes>) -> CoreResult<()> {
        self.write_committed(key, timestamp, Some(value.into()))
    }

    /// Writes a committed deletion tombstone.
    ///
    /// # Errors
    ///
    /// Fails if the key holds an unresolved intent or lies outside the key space.
    pub fn delete(&self, key: &Key, timestamp: Timestamp) -> CoreResult<()> {
        self.write_committed(key, timestamp, None)
    }

    /// Writes a provisional value on behalf of `txn`.
    ///
    /// # Errors
    ///
    /// Fails if another transaction holds an intent on the key, or if a
    /// committed version at or above the intent's timestamp exists.
    pub fn put_intent(&self, key: &Key, txn: TxnMeta, value: Option<Bytes>) -> CoreResult<()> {
        self.mutate_key(key, |versions| {
            if let Some(existing) = versions.first().and_then(|v| v.txn) {
                if existing.txn_id != txn.txn_id {
                    return Err(CoreError::invalid_state(format!(
                        "key {key} holds an intent of transaction {}",
                        existing.txn_id
                    )));
                }
                versions.remove(0);
            }
            if let Some(newest) = versions.first() {
                if newest.timestamp >= txn.timestamp {
                    return Err(CoreError::invalid_state(format!(
                        "intent at {} on key {key} is older than committed version at {}",
                        txn.timestamp, newest.timestamp
                    )));
                }
            }
            versions.insert(0, MvccVersion::intent(key, txn, value));
            Ok(())
        })
    }

    /// Reads the newest committed value at or below `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` if the version read is corrupt.
    pub fn get(&self, key: &Key, timestamp: Timestamp) -> CoreResult<Option<Bytes>> {
        let data = Arc::clone(&self.data.read());
        let Some(versions) = data.get(key) else {
            return Ok(None);
        };
        match committed_versions(versions)
            .iter()
            .find(|v| v.timestamp <= timestamp)
        {
            Some(version) => {
                version.verify(key)?;
                Ok(version.value.clone())
            }
            None => Ok(None),
        }
    }

    /// Every stored version of `key`, newest first.
    pub fn versions(&self, key: &Key) -> Vec<MvccVersion> {
        self.data.read().get(key).cloned().unwrap_or_default()
    }

    /// Current statistics of a tracked range.
    pub fn stats(&self, range_id: RangeId) -> Option<MvccStats> {
        self.ranges.read().stats.get(&range_id).copied()
    }

    /// Snapshots not yet dropped.
    pub fn open_snapshots(&self) -> usize {
        self.open_snapshots.load(Ordering::SeqCst)
    }

    /// Snapshot iterators not yet dropped.
    pub fn open_iterators(&self) -> usize {
        self.open_iterators.load(Ordering::SeqCst)
    }

    /// Makes `new_snapshot` fail while set.
    #[cfg(any(test, feature = "testing"))]
    pub fn fail_snapshots(&self, fail: bool) {
        self.faults.snapshot.store(fail, Ordering::SeqCst);
    }

    /// Makes `range_size` fail while set.
    #[cfg(any(test, feature = "testing"))]
    pub fn fail_range_size(&self, fail: bool) {
        self.faults.range_size.store(fail, Ordering::SeqCst);
    }

    /// Makes `range_stat(_, stat)` fail while set.
    #[cfg(any(test, feature = "testing"))]
    pub fn fail_stat(&self, stat: RangeStat, fail: bool) {
        let mut stats = self.faults.stats.lock();
        if fail {
            stats.insert(stat);
        } else {
            stats.remove(&stat);
        }
    }

    /// Makes every GC batch containing `key` fail.
    #[cfg(any(test, feature = "testing"))]
    pub fn fail_gc_for_key(&self, key: Key) {
        self.faults.gc_keys.lock().insert(key);
    }

    /// Removes every injected failure.
    #[cfg(any(test, feature = "testing"))]
    pub fn clear_faults(&self) {
        self.fail_snapshots(false);
        self.fail_range_size(false);
        self.faults.stats.lock().clear();
        self.faults.gc_keys.lock().clear();
    }

    /// Damages the stored bytes of one version without updating its checksum.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no version of `key` exists at `timestamp`.
    pub fn corrupt_version(&self, key: &Key, timestamp: Timestamp) -> CoreResult<()> {
        let mut data = self.data.write();
        let map = Arc::make_mut(&mut *data);
        let version = map
            .get_mut(key)
            .and_then(|versions| versions.iter_mut().find(|v| v.timestamp == timestamp))
            .ok_or_else(|| CoreError::not_found("version", format!("{key}@{timestamp}")))?;

        match &version.value {
            Some(value) if !value.is_empty() => {
                let mut damaged = value.to_vec();
                damaged[0] ^= 0xff;
                version.value = Some(Bytes::from(damaged));
            }
            _ => version.checksum ^= 0xdead_beef,
        }
        Ok(())
    }

    fn write_committed(
        &self,
        key: &Key,
        timestamp: Timestamp,
        value: Option<Bytes>,
    ) -> CoreResult<()> {
        self.mutate_key(key, |versions| {
            if versions.first().is_some_and(MvccVersion::is_intent) {
                return Err(CoreError::invalid_state(format!(
                    "key {key} holds an unresolved intent"
                )));
            }
            insert_version(versions, MvccVersion::committed(key, timestamp, value));
            Ok(())
        })
    }

    /// Runs `f` on the versions of `key` and folds the statistics delta into the
    /// owning range. `f` must not modify the versions when it returns an error.
    fn mutate_key<T>(
        &self,
        key: &Key,
        f: impl FnOnce(&mut Vec<MvccVersion>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        if key >= &Key::MAX {
            return Err(CoreError::ValidationError(format!(
                "key {key} is outside the key space"
            )));
        }

        let mut data = self.data.write();
        let map = Arc::make_mut(&mut *data);
        let versions = map.entry(key.clone()).or_default();
        let before = MvccStats::for_key(key, versions);
        let result = f(versions);
        let after = MvccStats::for_key(key, versions);
        if versions.is_empty() {
            map.remove(key);
        }
        if after != before {
            self.ranges.write().apply(key, after - before);
        }
        result
    }
}

/// Inserts keeping newest-first order; a version at an existing timestamp replaces it.
fn insert_version(versions: &mut Vec<MvccVersion>, version: MvccVersion) {
    match versions.binary_search_by(|probe| version.timestamp.cmp(&probe.timestamp)) {
        Ok(pos) => versions[pos] = version,
        Err(pos) => versions.insert(pos, version),
    }
}

impl Engine for MemoryEngine {
    type Snapshot = MemorySnapshot;

    fn new_snapshot(&self) -> CoreResult<MemorySnapshot> {
        if self.faults.snapshot.load(Ordering::SeqCst) {
            return Err(CoreError::storage("injected snapshot failure"));
        }
        Ok(MemorySnapshot {
            data: Arc::clone(&self.data.read()),
            open_iterators: Arc::clone(&self.open_iterators),
            _guard: OpenGuard::acquire(&self.open_snapshots),
        })
    }

    fn track_range(&self, desc: &RangeDescriptor) -> CoreResult<()> {
        desc.validate()?;

        let data = self.data.read();
        let mut ranges = self.ranges.write();
        ranges.bounds.retain(|_, (_, id)| *id != desc.range_id);

        let overlapping = ranges
            .bounds
            .iter()
            .find(|(start, (end, _))| **start < desc.end_key && desc.start_key < *end);
        if let Some((_, (_, other))) = overlapping {
            return Err(CoreError::invalid_state(format!(
                "range {} overlaps tracked range {other}",
                desc.range_id
            )));
        }

        let mut stats = MvccStats::default();
        for (key, versions) in
            data.range::<Key, _>((Bound::Included(&desc.start_key), Bound::Excluded(&desc.end_key)))
        {
            stats += MvccStats::for_key(key, versions);
        }

        ranges
            .bounds
            .insert(desc.start_key.clone(), (desc.end_key.clone(), desc.range_id));
        ranges.stats.insert(desc.range_id, stats);
        Ok(())
    }

    fn untrack_range(&self, range_id: RangeId) {
        let mut ranges = self.ranges.write();
        ranges.bounds.retain(|_, (_, id)| *id != range_id);
        ranges.stats.remove(&range_id);
    }

    fn range_size(&self, range_id: RangeId) -> CoreResult<i64> {
        if self.faults.range_size.load(Ordering::SeqCst) {
            return Err(CoreError::storage("injected range size failure"));
        }
        Ok(self.ranges.read().stats(range_id)?.total_bytes)
    }

    fn range_stat(&self, range_id: RangeId, stat: RangeStat) -> CoreResult<i64> {
        if self.faults.stats.lock().contains(&stat) {
            return Err(CoreError::storage(format!(
                "injected {} failure",
                stat.as_str()
            )));
        }
        let stats = self.ranges.read().stats(range_id)?;
        Ok(match stat {
            RangeStat::LiveBytes => stats.live_bytes,
            RangeStat::IntentBytes => stats.intent_bytes,
            RangeStat::LiveCount => stats.live_count,
            RangeStat::IntentCount => stats.intent_count,
        })
    }

    fn gc(&self, keys: &[GcKey]) -> CoreResult<GcResult> {
        {
            let failing = self.faults.gc_keys.lock();
            if let Some(bad) = keys.iter().find(|k| failing.contains(&k.key)) {
                return Err(CoreError::storage(format!(
                    "injected GC failure on key {}",
                    bad.key
                )));
            }
        }

        let mut data = self.data.write();
        let map = Arc::make_mut(&mut *data);
        let mut ranges = self.ranges.write();
        let mut result = GcResult::default();

        for gc_key in keys {
            let Some(versions) = map.get_mut(&gc_key.key) else {
                continue;
            };
            let before = MvccStats::for_key(&gc_key.key, versions);
            let count_before = versions.len();
            versions.retain(|v| v.is_intent() || v.timestamp > gc_key.timestamp);
            let removed = count_before - versions.len();
            if removed == 0 {
                continue;
            }

            let after = MvccStats::for_key(&gc_key.key, versions);
            if versions.is_empty() {
                map.remove(&gc_key.key);
            }
            ranges.apply(&gc_key.key, after - before);

            result.keys += 1;
            result.versions_removed += removed;
            result.bytes_reclaimed += before.total_bytes - after.total_bytes;
        }

        Ok(result)
    }

    fn resolve_intent(
        &self,
        key: &Key,
        txn_id: Uuid,
        commit_ts: Option<Timestamp>,
    ) -> CoreResult<()> {
        self.mutate_key(key, |versions| {
            let owned = versions
                .first()
                .and_then(|v| v.txn)
                .is_some_and(|txn| txn.txn_id == txn_id);
            if !owned {
                return Ok(());
            }

            let intent = versions.remove(0);
            if let Some(commit_ts) = commit_ts {
                let timestamp = commit_ts.max(intent.timestamp);
                insert_version(versions, MvccVersion::committed(key, timestamp, intent.value));
            }
            Ok(())
        })
    }
}

/// Point-in-time view of a [`MemoryEngine`].
#[derive(Debug)]
pub struct MemorySnapshot {
    data: Arc<VersionMap>,
    open_iterators: Arc<AtomicUsize>,
    _guard: OpenGuard,
}

impl Snapshot for MemorySnapshot {
    type Iter<'a> = MemoryRangeIter<'a>;

    fn iter_range(&self, start: &Key, end: &Key) -> CoreResult<MemoryRangeIter<'_>> {
        if start > end {
            return Err(CoreError::ValidationError(format!(
                "iteration start {start} sorts after end {end}"
            )));
        }
        Ok(MemoryRangeIter {
            inner: self
                .data
                .range::<Key, _>((Bound::Included(start), Bound::Excluded(end))),
            done: false,
            _guard: OpenGuard::acquire(&self.open_iterators),
        })
    }
}

/// Checksum-verifying iterator over a [`MemorySnapshot`].
#[derive(Debug)]
pub struct MemoryRangeIter<'a> {
    inner: btree_map::Range<'a, Key, Vec<MvccVersion>>,
    done: bool,
    _guard: OpenGuard,
}

impl Iterator for MemoryRangeIter<'_> {
    type Item = CoreResult<KeyVersions>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let (key, versions) = self.inner.next()?;
        if let Some(err) = versions.iter().find_map(|v| v.verify(key).err()) {
            self.done = true;
            return Some(Err(err));
        }
        Some(Ok(KeyVersions {
            key: key.clone(),
            versions: versions.clone(),
        }))
    }
}
