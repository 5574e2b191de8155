//! Keys and hybrid timestamps of the versioned key space.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Byte-wise ordered key. The key space is `[Key::MIN, Key::MAX)`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(Bytes);

impl Key {
    /// Smallest possible key.
    pub const MIN: Key = Key(Bytes::from_static(b""));

    /// Exclusive upper bound of the key space; no user key may reach it.
    pub const MAX: Key = Key(Bytes::from_static(b"\xff\xff"));

    /// Creates a key from any byte source.
    #[must_use]
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// Creates a key from a static byte string without copying.
    #[must_use]
    pub const fn from_static(bytes: &'static [u8]) -> Self {
        Self(Bytes::from_static(bytes))
    }

    /// Returns the immediate successor of this key (the key with a `0x00` appended).
    #[must_use]
    pub fn next(&self) -> Self {
        let mut next = Vec::with_capacity(self.0.len() + 1);
        next.extend_from_slice(&self.0);
        next.push(0);
        Self(Bytes::from(next))
    }

    /// Raw bytes of the key.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length of the key in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true for the empty key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&'static str> for Key {
    fn from(value: &'static str) -> Self {
        Self(Bytes::from_static(value.as_bytes()))
    }
}

impl From<Vec<u8>> for Key {
    fn from(value: Vec<u8>) -> Self {
        Self(Bytes::from(value))
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.escape_ascii())
    }
}

/// Hybrid logical timestamp attached to every MVCC version.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Wall clock reading in nanoseconds since the Unix epoch.
    pub wall_time: i64,
    /// Logical counter ordering events with equal wall time.
    pub logical: i32,
}

impl Timestamp {
    /// The zero timestamp.
    pub const ZERO: Timestamp = Timestamp {
        wall_time: 0,
        logical: 0,
    };

    /// Creates a timestamp from its parts.
    #[must_use]
    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    /// Creates a timestamp with a zero logical component.
    #[must_use]
    pub const fn from_nanos(wall_time: i64) -> Self {
        Self::new(wall_time, 0)
    }

    /// Converts a wall clock reading. Instants beyond the `i64` nanosecond
    /// range saturate.
    #[must_use]
    pub fn from_datetime(now: DateTime<Utc>) -> Self {
        Self::from_nanos(now.timestamp_nanos_opt().unwrap_or(i64::MAX))
    }

    /// Returns the timestamp moved back by `nanos` wall nanoseconds.
    #[must_use]
    pub const fn sub_nanos(self, nanos: i64) -> Self {
        Self::new(self.wall_time.saturating_sub(nanos), self.logical)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:09},{}",
            self.wall_time.div_euclid(1_000_000_000),
            self.wall_time.rem_euclid(1_000_000_000),
            self.logical
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_order_bytewise() {
        assert!(Key::MIN < Key::from("a"));
        assert!(Key::from("a") < Key::from("a").next());
        assert!(Key::from("a").next() < Key::from("b"));
        assert!(Key::from("zzzz") < Key::MAX);
    }

    #[test]
    fn timestamps_order_by_wall_then_logical() {
        assert!(Timestamp::new(1, 5) < Timestamp::new(2, 0));
        assert!(Timestamp::new(2, 0) < Timestamp::new(2, 1));
    }

    #[test]
    fn timestamp_from_datetime_uses_nanoseconds() {
        let now = DateTime::<Utc>::from_timestamp(10, 5).unwrap();
        assert_eq!(Timestamp::from_datetime(now), Timestamp::from_nanos(10_000_000_005));
    }

    #[test]
    fn key_display_escapes_binary() {
        assert_eq!(Key::MAX.to_string(), "\"\\xff\\xff\"");
    }
}
