//! Generic, time-bucketed caches.
//!
//! A [`Cache`] stores items of one type keyed by [`CacheKey`](crate::CacheKey)
//! and grouped into fixed-width [`TimeBucket`](crate::TimeBucket)s:
//! - Saves overwrite the same key within a bucket
//! - Reads flatten all buckets, later buckets winning
//! - An optional reducer derives a view from the flattened snapshot
//! - A bounded feed receives a copy of each touched bucket, dropping
//!   copies when nobody keeps up
//!
//! # Example
//!
//! ```ignore
//! let cache: Cache<String, usize> = Cache::new();
//! cache.save("hello".to_string(), "a");
//! cache.set_reducer(|snapshot| snapshot.len());
//! assert_eq!(cache.reduce()?.into_reduced(), Some(1));
//! ```

mod engine;
mod feed;
mod view;

pub use engine::Cache;
pub use feed::{BucketSnapshot, FeedHandle};
pub use view::{Reducer, Snapshot, View};
