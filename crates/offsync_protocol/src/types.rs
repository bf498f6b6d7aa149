//! Core type definitions shared by the sync engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// A remote-ready document payload.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Wall-clock instant with millisecond precision.
///
/// Stored as milliseconds since the UNIX epoch so it can be compared
/// against server-assigned timestamps without loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// The UNIX epoch.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// Returns the current wall-clock time.
    #[must_use]
    pub fn now() -> Self {
        Self::from_system_time(SystemTime::now())
    }

    /// Returns the current time, forced strictly after `previous`.
    ///
    /// Keeps `lastModified` monotonic per writer when the clock steps back
    /// or two edits land in the same millisecond.
    #[must_use]
    pub fn now_after(previous: Timestamp) -> Self {
        let now = Self::now();
        if now > previous {
            now
        } else {
            Timestamp(previous.0 + 1)
        }
    }

    /// Creates a timestamp from milliseconds since the epoch.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Creates a timestamp from a [`SystemTime`].
    #[must_use]
    pub fn from_system_time(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self(d.as_millis() as i64),
            Err(e) => Self(-(e.duration().as_millis() as i64)),
        }
    }

    /// Converts back to a [`SystemTime`].
    #[must_use]
    pub fn to_system_time(self) -> SystemTime {
        if self.0 >= 0 {
            UNIX_EPOCH + Duration::from_millis(self.0 as u64)
        } else {
            UNIX_EPOCH - Duration::from_millis(self.0.unsigned_abs())
        }
    }

    /// Returns the raw millisecond value.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// Absolute distance between two timestamps.
    #[must_use]
    pub fn abs_diff(self, other: Timestamp) -> Duration {
        Duration::from_millis(self.0.abs_diff(other.0))
    }

    /// Returns this timestamp moved forward by `d`.
    #[must_use]
    pub fn plus(self, d: Duration) -> Self {
        Self(self.0.saturating_add(d.as_millis() as i64))
    }

    /// Returns this timestamp moved back by `d`.
    #[must_use]
    pub fn minus(self, d: Duration) -> Self {
        Self(self.0.saturating_sub(d.as_millis() as i64))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

/// Kind of record, doubling as the remote collection name.
///
/// Domain crates define their kinds as constants, e.g.
/// `EntityType::new("transactions")`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityType(String);

impl EntityType {
    /// Creates an entity type from its collection name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the collection name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntityType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_ordering_and_diff() {
        let a = Timestamp::from_millis(1_000);
        let b = a.plus(Duration::from_secs(10));
        assert!(b > a);
        assert_eq!(a.abs_diff(b), Duration::from_secs(10));
        assert_eq!(b.abs_diff(a), Duration::from_secs(10));
        assert_eq!(b.minus(Duration::from_secs(10)), a);
    }

    #[test]
    fn now_after_is_strictly_later() {
        let far_future = Timestamp::now().plus(Duration::from_secs(3600));
        let next = Timestamp::now_after(far_future);
        assert_eq!(next.as_millis(), far_future.as_millis() + 1);

        let past = Timestamp::from_millis(5);
        assert!(Timestamp::now_after(past) > past);
    }

    #[test]
    fn system_time_conversion() {
        let ts = Timestamp::from_millis(1_700_000_000_123);
        assert_eq!(Timestamp::from_system_time(ts.to_system_time()), ts);
    }

    #[test]
    fn entity_type_display() {
        let ty = EntityType::from("transactions");
        assert_eq!(ty.as_str(), "transactions");
        assert_eq!(ty.to_string(), "transactions");
    }
}
