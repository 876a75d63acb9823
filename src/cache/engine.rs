//! Time-bucketed cache engine.

use super::feed::{BucketSnapshot, Feed, FeedHandle};
use super::view::{Reducer, Snapshot, View};
use crate::config::CacheConfig;
use crate::error::{Result, StoreError};
use crate::types::{CacheKey, Item, TimeBucket, Timestamp};
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

type Buckets<T> = BTreeMap<TimeBucket, HashMap<CacheKey, Item<T>>>;

/// Typed container of items indexed by time bucket and key.
///
/// Holds at most one reducer producing views of type `V`, and a bounded
/// feed that receives a copy of the touched bucket after every save.
pub struct Cache<T, V = serde_json::Value> {
    config: CacheConfig,
    buckets: Mutex<Buckets<T>>,
    reducer: RwLock<Option<Reducer<T, V>>>,
    feed: Feed<T>,
}

impl<T: Clone, V> Cache<T, V> {
    /// Create a cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(CacheConfig::default())
    }

    pub fn with_config(config: CacheConfig) -> Self {
        let feed = Feed::new(config.feed_capacity);
        Self {
            config,
            buckets: Mutex::new(BTreeMap::new()),
            reducer: RwLock::new(None),
            feed,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    // --- Writes ---

    /// Store `data` under `key` in the current time bucket.
    ///
    /// Overwrites an existing item for `key` in the same bucket. A copy of
    /// the bucket is offered to the feed after the data lock is released;
    /// if the feed is full the copy is dropped.
    ///
    /// Save time never moves behind the newest bucket, so a wall clock
    /// stepping backwards cannot make a newer save lose to an older one.
    pub fn save(&self, data: T, key: impl Into<CacheKey>) {
        self.save_at(data, key.into(), Timestamp::now());
    }

    pub(crate) fn save_at(&self, data: T, key: CacheKey, now: Timestamp) {
        let granularity = self.config.bucket_granularity;

        let (bucket, snapshot) = {
            let mut buckets = self.buckets.lock();
            let now = match buckets.keys().next_back() {
                Some(newest) if now.0 < newest.0 => Timestamp(newest.0),
                _ => now,
            };
            let bucket = TimeBucket::containing(now, granularity);
            let entries = buckets.entry(bucket).or_default();
            entries.insert(key, Item::new(data, now));

            // Skip the copy when nobody is draining the feed
            let snapshot = if self.feed.has_room() {
                Some(BucketSnapshot {
                    bucket,
                    items: entries.clone(),
                })
            } else {
                None
            };
            (bucket, snapshot)
        };

        match snapshot {
            Some(snapshot) => {
                self.feed.publish(snapshot);
            }
            None => self.feed.record_drop(bucket),
        }
    }

    // --- Reads ---

    /// Latest item for every key across all buckets.
    ///
    /// When a key appears in several buckets the later bucket wins.
    pub fn get_all(&self) -> Snapshot<T> {
        let buckets = self.buckets.lock();
        let mut items = HashMap::new();
        for entries in buckets.values() {
            for (key, item) in entries {
                items.insert(key.clone(), item.clone());
            }
        }
        Snapshot::new(items)
    }

    /// Latest item stored under `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<Item<T>> {
        let buckets = self.buckets.lock();
        buckets
            .values()
            .rev()
            .find_map(|entries| entries.get(key).cloned())
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        let buckets = self.buckets.lock();
        buckets
            .values()
            .flat_map(|entries| entries.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.lock().is_empty()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.lock().len()
    }

    // --- Reducer ---

    /// Install `reducer`, replacing any previous one.
    pub fn set_reducer<F>(&self, reducer: F)
    where
        F: Fn(&Snapshot<T>) -> V + Send + Sync + 'static,
    {
        *self.reducer.write() = Some(Arc::new(reducer));
    }

    /// Remove the installed reducer. Returns whether one was installed.
    pub fn clear_reducer(&self) -> bool {
        self.reducer.write().take().is_some()
    }

    pub fn has_reducer(&self) -> bool {
        self.reducer.read().is_some()
    }

    /// Apply the reducer to [`get_all`](Self::get_all).
    ///
    /// Without a reducer the raw snapshot is returned. A panicking reducer
    /// yields [`StoreError::ReducerFailure`]; cached data is untouched.
    pub fn reduce(&self) -> Result<View<T, V>> {
        let snapshot = self.get_all();
        let reducer = self.reducer.read().clone();

        match reducer {
            None => Ok(View::Raw(snapshot)),
            Some(reducer) => panic::catch_unwind(AssertUnwindSafe(|| reducer(&snapshot)))
                .map(View::Reduced)
                .map_err(|payload| StoreError::ReducerFailure(panic_message(payload.as_ref()))),
        }
    }

    // --- Feed ---

    /// Handle for reading bucket snapshots emitted on save.
    pub fn feed(&self) -> FeedHandle<T> {
        self.feed.subscribe()
    }

    /// Snapshots dropped because the feed was full.
    pub fn feed_dropped(&self) -> u64 {
        self.feed.dropped()
    }
}

impl<T: Clone, V> Default for Cache<T, V> {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "reducer panicked".to_string()
    }
}
