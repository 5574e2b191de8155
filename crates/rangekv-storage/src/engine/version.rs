use std::ops::{AddAssign, Sub, SubAssign};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rangekv_core::{CoreError, CoreResult, Key, Timestamp};

/// Fixed per-version accounting overhead (encoded timestamp).
pub const VERSION_OVERHEAD_BYTES: i64 = 12;

/// Transaction owning a write intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxnMeta {
    /// Transaction identifier.
    pub txn_id: Uuid,
    /// Provisional timestamp the intent was written at.
    pub timestamp: Timestamp,
}

/// One stored version of a key.
///
/// `value == None` is a deletion tombstone. A version carrying `txn` is an
/// unresolved write intent; at most one exists per key and it is always the newest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccVersion {
    pub timestamp: Timestamp,
    pub value: Option<Bytes>,
    pub txn: Option<TxnMeta>,
    /// CRC32C written together with the version, checked on every read.
    pub checksum: u32,
}

impl MvccVersion {
    /// Committed version of `key`.
    #[must_use]
    pub fn committed(key: &Key, timestamp: Timestamp, value: Option<Bytes>) -> Self {
        let mut version = Self {
            timestamp,
            value,
            txn: None,
            checksum: 0,
        };
        version.checksum = version.compute_checksum(key);
        version
    }

    /// Write intent of `txn` on `key`.
    #[must_use]
    pub fn intent(key: &Key, txn: TxnMeta, value: Option<Bytes>) -> Self {
        let mut version = Self {
            timestamp: txn.timestamp,
            value,
            txn: Some(txn),
            checksum: 0,
        };
        version.checksum = version.compute_checksum(key);
        version
    }

    #[must_use]
    pub const fn is_intent(&self) -> bool {
        self.txn.is_some()
    }

    #[must_use]
    pub const fn is_deletion(&self) -> bool {
        self.value.is_none()
    }

    /// Bytes this version accounts for in range statistics.
    #[must_use]
    pub fn byte_size(&self, key: &Key) -> i64 {
        let value_len = self.value.as_ref().map_or(0, Bytes::len);
        (key.len() + value_len) as i64 + VERSION_OVERHEAD_BYTES
    }

    /// CRC32C over the key, timestamp, transaction and value.
    #[must_use]
    pub fn compute_checksum(&self, key: &Key) -> u32 {
        let mut crc = crc32c::crc32c(key.as_bytes());
        crc = crc32c::crc32c_append(crc, &self.timestamp.wall_time.to_le_bytes());
        crc = crc32c::crc32c_append(crc, &self.timestamp.logical.to_le_bytes());
        if let Some(txn) = &self.txn {
            crc = crc32c::crc32c_append(crc, txn.txn_id.as_bytes());
        }
        match &self.value {
            Some(value) => {
                crc = crc32c::crc32c_append(crc, &[1]);
                crc32c::crc32c_append(crc, value)
            }
            None => crc32c::crc32c_append(crc, &[0]),
        }
    }

    /// Verifies the stored checksum.
    ///
    /// # Errors
    ///
    /// Returns `ChecksumMismatch` when the stored and recomputed checksums differ.
    pub fn verify(&self, key: &Key) -> CoreResult<()> {
        let actual = self.compute_checksum(key);
        if actual != self.checksum {
            return Err(CoreError::ChecksumMismatch {
                key: key.to_string(),
                timestamp: self.timestamp.to_string(),
                expected: self.checksum,
                actual,
            });
        }
        Ok(())
    }
}

/// A key with every stored version, newest first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyVersions {
    pub key: Key,
    pub versions: Vec<MvccVersion>,
}

impl KeyVersions {
    /// The key's write intent, if any.
    #[must_use]
    pub fn intent(&self) -> Option<&MvccVersion> {
        self.versions.first().filter(|v| v.is_intent())
    }

    /// Committed versions, newest first.
    #[must_use]
    pub fn committed(&self) -> &[MvccVersion] {
        committed_versions(&self.versions)
    }
}

pub(crate) fn committed_versions(versions: &[MvccVersion]) -> &[MvccVersion] {
    match versions.first() {
        Some(first) if first.is_intent() => &versions[1..],
        _ => versions,
    }
}

/// Aggregate statistics of a set of keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccStats {
    /// Bytes of every stored version, intents included.
    pub total_bytes: i64,
    /// Bytes of the newest committed version of keys that are not deleted.
    pub live_bytes: i64,
    /// Bytes of write intents.
    pub intent_bytes: i64,
    /// Keys whose newest committed version is not a tombstone.
    pub live_count: i64,
    /// Number of write intents.
    pub intent_count: i64,
}

impl MvccStats {
    /// Statistics contributed by one key.
    #[must_use]
    pub fn for_key(key: &Key, versions: &[MvccVersion]) -> Self {
        let mut stats = Self::default();
        for version in versions {
            let size = version.byte_size(key);
            stats.total_bytes += size;
            if version.is_intent() {
                stats.intent_bytes += size;
                stats.intent_count += 1;
            }
        }
        if let Some(newest) = committed_versions(versions).first() {
            if !newest.is_deletion() {
                stats.live_bytes += newest.byte_size(key);
                stats.live_count += 1;
            }
        }
        stats
    }

    /// Bytes not belonging to the live view.
    #[must_use]
    pub const fn non_live_bytes(&self) -> i64 {
        self.total_bytes - self.live_bytes
    }
}

impl AddAssign for MvccStats {
    fn add_assign(&mut self, rhs: Self) {
        self.total_bytes += rhs.total_bytes;
        self.live_bytes += rhs.live_bytes;
        self.intent_bytes += rhs.intent_bytes;
        self.live_count += rhs.live_count;
        self.intent_count += rhs.intent_count;
    }
}

impl SubAssign for MvccStats {
    fn sub_assign(&mut self, rhs: Self) {
        self.total_bytes -= rhs.total_bytes;
        self.live_bytes -= rhs.live_bytes;
        self.intent_bytes -= rhs.intent_bytes;
        self.live_count -= rhs.live_count;
        self.intent_count -= rhs.intent_count;
    }
}

impl Sub for MvccStats {
    type Output = Self;

    fn sub(mut self, rhs: Self) -> Self {
        self -= rhs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Key {
        Key::from("k")
    }

    #[test]
    fn test_checksum_detects_value_changes() {
        let mut version =
            MvccVersion::committed(&key(), Timestamp::from_nanos(5), Some(Bytes::from("v")));
        assert!(version.verify(&key()).is_ok());

        version.value = Some(Bytes::from("w"));
        let err = version.verify(&key()).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_checksum_distinguishes_tombstone_from_empty_value() {
        let tombstone = MvccVersion::committed(&key(), Timestamp::from_nanos(5), None);
        let empty =
            MvccVersion::committed(&key(), Timestamp::from_nanos(5), Some(Bytes::new()));
        assert_ne!(tombstone.checksum, empty.checksum);
    }

    #[test]
    fn test_stats_for_key() {
        let k = key();
        let intent = MvccVersion::intent(
            &k,
            TxnMeta {
                txn_id: Uuid::new_v4(),
                timestamp: Timestamp::from_nanos(30),
            },
            Some(Bytes::from("iii")),
        );
        let newest = MvccVersion::committed(&k, Timestamp::from_nanos(20), Some(Bytes::from("bb")));
        let oldest = MvccVersion::committed(&k, Timestamp::from_nanos(10), Some(Bytes::from("a")));

        let stats = MvccStats::for_key(&k, &[intent, newest, oldest]);
        assert_eq!(stats.intent_bytes, 1 + 3 + VERSION_OVERHEAD_BYTES);
        assert_eq!(stats.live_bytes, 1 + 2 + VERSION_OVERHEAD_BYTES);
        assert_eq!(
            stats.total_bytes,
            (1 + 3) + (1 + 2) + (1 + 1) + 3 * VERSION_OVERHEAD_BYTES
        );
        assert_eq!(stats.live_count, 1);
        assert_eq!(stats.intent_count, 1);
    }

    #[test]
    fn test_deleted_key_has_no_live_bytes() {
        let k = key();
        let tombstone = MvccVersion::committed(&k, Timestamp::from_nanos(20), None);
        let old = MvccVersion::committed(&k, Timestamp::from_nanos(10), Some(Bytes::from("a")));
        let stats = MvccStats::for_key(&k, &[tombstone, old]);
        assert_eq!(stats.live_bytes, 0);
        assert_eq!(stats.non_live_bytes(), stats.total_bytes);
    }
}
