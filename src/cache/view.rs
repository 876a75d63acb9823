//! Snapshot and view types produced by cache reads.

use crate::types::{CacheKey, Item};
use serde::Serialize;
use std::collections::hash_map;
use std::collections::HashMap;
use std::sync::Arc;

/// Aggregation function turning a full cache snapshot into a derived view.
pub type Reducer<T, V> = Arc<dyn Fn(&Snapshot<T>) -> V + Send + Sync>;

/// Flattened view of a cache: the latest item for every key.
///
/// Owned copy, never a reference into the live cache.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Snapshot<T> {
    items: HashMap<CacheKey, Item<T>>,
}

impl<T> Snapshot<T> {
    pub(crate) fn new(items: HashMap<CacheKey, Item<T>>) -> Self {
        Self { items }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, key: &CacheKey) -> Option<&Item<T>> {
        self.items.get(key)
    }

    /// Convenience lookup returning the stored value only.
    pub fn data(&self, key: &str) -> Option<&T> {
        self.items.get(&CacheKey::from(key)).map(Item::data)
    }

    pub fn iter(&self) -> hash_map::Iter<'_, CacheKey, Item<T>> {
        self.items.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CacheKey> {
        self.items.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Item<T>> {
        self.items.values()
    }

    pub fn into_inner(self) -> HashMap<CacheKey, Item<T>> {
        self.items
    }
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            items: HashMap::new(),
        }
    }
}

impl<'a, T> IntoIterator for &'a Snapshot<T> {
    type Item = (&'a CacheKey, &'a Item<T>);
    type IntoIter = hash_map::Iter<'a, CacheKey, Item<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Result of [`Cache::reduce`](crate::Cache::reduce).
///
/// Serializes untagged: the wire shape is the reduced value itself, or the
/// raw key/item map when no reducer is installed.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum View<T, V> {
    /// Output of the installed reducer.
    Reduced(V),
    /// The unreduced snapshot, returned when no reducer is installed.
    Raw(Snapshot<T>),
}

impl<T, V> View<T, V> {
    pub fn is_reduced(&self) -> bool {
        matches!(self, View::Reduced(_))
    }

    pub fn reduced(&self) -> Option<&V> {
        match self {
            View::Reduced(value) => Some(value),
            View::Raw(_) => None,
        }
    }

    pub fn into_reduced(self) -> Option<V> {
        match self {
            View::Reduced(value) => Some(value),
            View::Raw(_) => None,
        }
    }

    pub fn raw(&self) -> Option<&Snapshot<T>> {
        match self {
            View::Reduced(_) => None,
            View::Raw(snapshot) => Some(snapshot),
        }
    }

    pub fn into_raw(self) -> Option<Snapshot<T>> {
        match self {
            View::Reduced(_) => None,
            View::Raw(snapshot) => Some(snapshot),
        }
    }
}
