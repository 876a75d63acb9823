//! Core types for the cache store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

macro_rules! string_key {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(key: impl Into<String>) -> Self {
                $name(key.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(key: &str) -> Self {
                $name(key.to_string())
            }
        }

        impl From<String> for $name {
            fn from(key: String) -> Self {
                $name(key)
            }
        }
    };
}

string_key!(
    /// Identifies one cache within a store.
    StoreKey
);

string_key!(
    /// Identifies a logical record within a cache. Unique per time bucket.
    CacheKey
);

string_key!(
    /// Identity of a subscriber connection within a pool.
    ConnectionKey
);

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time. Clamps to the epoch if the system clock is before it.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_micros()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Start of a fixed-width time interval, in microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeBucket(pub i64);

impl TimeBucket {
    /// Truncate `ts` to the bucket of width `granularity` that contains it.
    ///
    /// Granularities below one microsecond are treated as one microsecond;
    /// those beyond `i64::MAX` microseconds saturate.
    pub fn containing(ts: Timestamp, granularity: Duration) -> Self {
        let width = i64::try_from(granularity.as_micros())
            .unwrap_or(i64::MAX)
            .max(1);
        TimeBucket(ts.0.div_euclid(width) * width)
    }
}

impl fmt::Debug for TimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TimeBucket({})", self.0)
    }
}

/// A stored value with its insertion time. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Item<T> {
    data: T,
    inserted_at: Timestamp,
}

impl<T> Item<T> {
    pub fn new(data: T, inserted_at: Timestamp) -> Self {
        Self { data, inserted_at }
    }

    pub fn data(&self) -> &T {
        &self.data
    }

    pub fn inserted_at(&self) -> Timestamp {
        self.inserted_at
    }

    pub fn into_data(self) -> T {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_truncation() {
        let second = Duration::from_secs(1);
        assert_eq!(
            TimeBucket::containing(Timestamp(1_500_000), second),
            TimeBucket(1_000_000)
        );
        assert_eq!(
            TimeBucket::containing(Timestamp(1_999_999), second),
            TimeBucket(1_000_000)
        );
        assert_eq!(
            TimeBucket::containing(Timestamp(2_000_000), second),
            TimeBucket(2_000_000)
        );
    }

    #[test]
    fn test_bucket_zero_granularity() {
        let bucket = TimeBucket::containing(Timestamp(42), Duration::ZERO);
        assert_eq!(bucket, TimeBucket(42));
    }

    #[test]
    fn test_bucket_huge_granularity_saturates() {
        let ts = Timestamp(1_700_000_000_000_000);
        assert_eq!(TimeBucket::containing(ts, Duration::MAX), TimeBucket(0));
        assert_eq!(
            TimeBucket::containing(Timestamp(-5), Duration::MAX),
            TimeBucket(-i64::MAX)
        );
    }

    #[test]
    fn test_keys_serialize_as_strings() {
        let key = CacheKey::from("a");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"a\"");
        assert_eq!(key.to_string(), "a");
        assert_eq!(format!("{:?}", StoreKey::new("s")), "StoreKey(\"s\")");
    }
}
