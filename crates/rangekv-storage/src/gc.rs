//! TTL-based garbage collection policy for MVCC versions.

use rangekv_core::{GcMetadata, Key, Timestamp};

use crate::engine::MvccVersion;

const NANOS_PER_SECOND: i64 = 1_000_000_000;

/// What a GC pass found for one key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcDecision {
    /// Committed versions at or below this timestamp are collectable.
    pub collect_through: Option<Timestamp>,
    /// Bytes of the collectable versions.
    pub collectable_bytes: i64,
    /// Bytes of non-live versions that must be kept for now.
    pub retained_non_live_bytes: i64,
}

/// Keeps every version needed to read at any timestamp within the last
/// `ttl_seconds`; older versions are collectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcPolicy {
    ttl_seconds: i64,
}

impl GcPolicy {
    pub fn new(ttl_seconds: i64) -> Self {
        Self { ttl_seconds }
    }

    pub fn ttl_seconds(&self) -> i64 {
        self.ttl_seconds
    }

    fn ttl_nanos(&self) -> i64 {
        self.ttl_seconds.saturating_mul(NANOS_PER_SECOND)
    }

    /// Oldest timestamp still readable under the policy.
    pub fn expiration(&self, now: Timestamp) -> Timestamp {
        now.sub_nanos(self.ttl_nanos())
    }

    /// Returns the newest collectable timestamp of `versions` (newest first).
    ///
    /// Intents are never collected. The version visible at the expiration
    /// timestamp survives unless it is a deletion tombstone.
    pub fn filter(&self, now: Timestamp, versions: &[MvccVersion]) -> Option<Timestamp> {
        let expiration = self.expiration(now);
        let committed: Vec<&MvccVersion> = versions.iter().filter(|v| !v.is_intent()).collect();
        let visible = committed.iter().position(|v| v.timestamp <= expiration)?;

        if committed[visible].is_deletion() {
            return Some(committed[visible].timestamp);
        }
        committed.get(visible + 1).map(|v| v.timestamp)
    }

    /// Classifies the versions of `key`, adding every retained non-live version
    /// to `byte_counts` (one slot per [`GcMetadata`] bucket) by time left until
    /// it becomes collectable.
    pub fn decide(
        &self,
        now: Timestamp,
        key: &Key,
        versions: &[MvccVersion],
        byte_counts: &mut [i64],
    ) -> GcDecision {
        let mut decision = GcDecision {
            collect_through: self.filter(now, versions),
            ..GcDecision::default()
        };

        let mut newer: Option<&MvccVersion> = None;
        for version in versions.iter().filter(|v| !v.is_intent()) {
            let size = version.byte_size(key);
            let collected = decision
                .collect_through
                .is_some_and(|through| version.timestamp <= through);

            if collected {
                decision.collectable_bytes += size;
            } else {
                // A version stops being live when a newer one shadows it, or
                // when it is itself the newest and a tombstone.
                let non_live_since = match newer {
                    Some(shadow) => Some(shadow.timestamp),
                    None if version.is_deletion() => Some(version.timestamp),
                    None => None,
                };
                if let Some(since) = non_live_since {
                    let until_expiration = since
                        .wall_time
                        .saturating_add(self.ttl_nanos())
                        .saturating_sub(now.wall_time);
                    if !byte_counts.is_empty() {
                        let bucket = GcMetadata::bucket_index(until_expiration, self.ttl_seconds)
                            .min(byte_counts.len() - 1);
                        byte_counts[bucket] += size;
                    }
                    decision.retained_non_live_bytes += size;
                }
            }
            newer = Some(version);
        }

        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use rangekv_core::GC_BUCKETS;
    use uuid::Uuid;

    use crate::engine::TxnMeta;

    const SEC: i64 = 1_000_000_000;

    fn key() -> Key {
        Key::from("k")
    }

    fn value(at: i64) -> MvccVersion {
        MvccVersion::committed(&key(), Timestamp::from_nanos(at * SEC), Some(Bytes::from("v")))
    }

    fn tombstone(at: i64) -> MvccVersion {
        MvccVersion::committed(&key(), Timestamp::from_nanos(at * SEC), None)
    }

    fn now(at: i64) -> Timestamp {
        Timestamp::from_nanos(at * SEC)
    }

    #[test]
    fn test_nothing_collectable_within_ttl() {
        let policy = GcPolicy::new(10);
        let versions = vec![value(15), value(12)];
        assert_eq!(policy.filter(now(20), &versions), None);
    }

    #[test]
    fn test_keeps_version_visible_at_expiration() {
        let policy = GcPolicy::new(10);
        // expiration = 10: value(8) is visible there and survives, value(5) and value(2) go.
        let versions = vec![value(15), value(8), value(5), value(2)];
        assert_eq!(
            policy.filter(now(20), &versions),
            Some(Timestamp::from_nanos(5 * SEC))
        );
    }

    #[test]
    fn test_expired_tombstone_is_collected_with_history() {
        let policy = GcPolicy::new(10);
        let versions = vec![tombstone(8), value(5)];
        assert_eq!(
            policy.filter(now(20), &versions),
            Some(Timestamp::from_nanos(8 * SEC))
        );
    }

    #[test]
    fn test_single_live_version_is_never_collected() {
        let policy = GcPolicy::new(10);
        assert_eq!(policy.filter(now(1_000), &[value(1)]), None);
    }

    #[test]
    fn test_intents_are_ignored() {
        let policy = GcPolicy::new(10);
        let intent = MvccVersion::intent(
            &key(),
            TxnMeta {
                txn_id: Uuid::new_v4(),
                timestamp: now(1),
            },
            None,
        );
        assert_eq!(policy.filter(now(1_000), &[intent.clone()]), None);
        assert_eq!(
            policy.filter(now(1_000), &[intent, value(1), value(0)]),
            Some(Timestamp::ZERO)
        );
    }

    #[test]
    fn test_decide_buckets_retained_non_live_bytes() {
        let policy = GcPolicy::new(100);
        let mut buckets = vec![0; GC_BUCKETS];
        // value(50) shadows value(40) since t=50, collectable at t=150: 55s from now(95).
        let versions = vec![value(50), value(40)];
        let decision = policy.decide(now(95), &key(), &versions, &mut buckets);

        let size = versions[1].byte_size(&key());
        assert_eq!(decision.collect_through, None);
        assert_eq!(decision.retained_non_live_bytes, size);
        assert_eq!(buckets[5], size);
        assert_eq!(buckets.iter().sum::<i64>(), size);
    }

    #[test]
    fn test_decide_reports_collectable_bytes() {
        let policy = GcPolicy::new(10);
        let mut buckets = vec![0; GC_BUCKETS];
        let versions = vec![value(15), value(8), value(5)];
        let decision = policy.decide(now(20), &key(), &versions, &mut buckets);

        assert_eq!(decision.collectable_bytes, versions[2].byte_size(&key()));
        // value(8) is shadowed since 15 and expires at 25.
        assert_eq!(decision.retained_non_live_bytes, versions[1].byte_size(&key()));
        assert_eq!(buckets[5], versions[1].byte_size(&key()));
    }
}
