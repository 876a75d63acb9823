//! Named registry of typed caches.

use crate::cache::Cache;
use crate::config::CacheConfig;
use crate::error::{Result, StoreError};
use crate::types::StoreKey;
use parking_lot::Mutex;
use serde::Serialize;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::sync::Arc;

/// Object-safe face of a `Cache<T, V>` kept in the registry.
trait ErasedCache: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    /// Reduce and serialize the current view.
    fn reduce_json(&self) -> Result<serde_json::Value>;

    /// Serialize the raw snapshot, bypassing the reducer.
    fn raw_json(&self) -> Result<serde_json::Value>;
}

impl<T, V> ErasedCache for Cache<T, V>
where
    T: Clone + Serialize + Send + Sync + 'static,
    V: Serialize + Send + Sync + 'static,
{
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn reduce_json(&self) -> Result<serde_json::Value> {
        let view = self.reduce()?;
        Ok(serde_json::to_value(view)?)
    }

    fn raw_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self.get_all())?)
    }
}

/// A registered cache tagged with the concrete type it was created as.
#[derive(Clone)]
struct Entry {
    type_name: &'static str,
    cache: Arc<dyn ErasedCache>,
}

#[derive(Default)]
struct Registry {
    entries: HashMap<StoreKey, Entry>,
    /// Keys in creation order.
    keys: Vec<StoreKey>,
}

/// Registry mapping a [`StoreKey`] to exactly one typed [`Cache`].
///
/// Caches of different types live side by side; lookups name the expected
/// `Cache<T, V>` type and fail with [`StoreError::TypeMismatch`] when it
/// differs from the type used at creation.
pub struct Store {
    name: String,
    cache_config: CacheConfig,
    registry: Mutex<Registry>,
}

impl Store {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_cache_config(name, CacheConfig::default())
    }

    /// Create a store whose caches default to `cache_config`.
    pub fn with_cache_config(name: impl Into<String>, cache_config: CacheConfig) -> Self {
        Self {
            name: name.into(),
            cache_config,
            registry: Mutex::new(Registry::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a new cache under `key` using the store's cache config.
    pub fn create_cache<T, V>(&self, key: impl Into<StoreKey>) -> Result<Arc<Cache<T, V>>>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        V: Serialize + Send + Sync + 'static,
    {
        self.create_cache_with_config(key, self.cache_config.clone())
    }

    /// Register a new cache under `key`.
    ///
    /// Fails with [`StoreError::DuplicateKey`] if `key` is taken; the
    /// existing cache is left untouched.
    pub fn create_cache_with_config<T, V>(
        &self,
        key: impl Into<StoreKey>,
        config: CacheConfig,
    ) -> Result<Arc<Cache<T, V>>>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        V: Serialize + Send + Sync + 'static,
    {
        let key = key.into();
        let cache = Arc::new(Cache::<T, V>::with_config(config));

        let mut registry = self.registry.lock();
        if registry.entries.contains_key(&key) {
            return Err(StoreError::DuplicateKey(key));
        }
        registry.entries.insert(
            key.clone(),
            Entry {
                type_name: type_name::<Cache<T, V>>(),
                cache: cache.clone(),
            },
        );
        registry.keys.push(key);

        Ok(cache)
    }

    /// Look up the cache registered under `key` as a `Cache<T, V>`.
    pub fn use_cache<T, V>(&self, key: impl Into<StoreKey>) -> Result<Arc<Cache<T, V>>>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        V: Serialize + Send + Sync + 'static,
    {
        let key = key.into();
        let entry = self
            .registry
            .lock()
            .entries
            .get(&key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        entry
            .cache
            .into_any()
            .downcast::<Cache<T, V>>()
            .map_err(|_| StoreError::TypeMismatch {
                key,
                expected: type_name::<Cache<T, V>>(),
                found: entry.type_name,
            })
    }

    /// Copy of all registered keys, in creation order.
    pub fn keys(&self) -> Vec<StoreKey> {
        self.registry.lock().keys.clone()
    }

    pub fn contains(&self, key: &StoreKey) -> bool {
        self.registry.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.registry.lock().keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.lock().keys.is_empty()
    }

    /// JSON object mapping every key to its cache's reduced view.
    ///
    /// Reducers run after the registry lock is released. A cache whose
    /// reducer fails contributes its raw snapshot instead; the other caches
    /// are unaffected.
    pub fn snapshot(&self) -> Result<serde_json::Value> {
        let entries: Vec<(StoreKey, Arc<dyn ErasedCache>)> = {
            let registry = self.registry.lock();
            registry
                .keys
                .iter()
                .filter_map(|key| {
                    registry
                        .entries
                        .get(key)
                        .map(|entry| (key.clone(), entry.cache.clone()))
                })
                .collect()
        };

        let mut views = serde_json::Map::with_capacity(entries.len());
        for (key, cache) in entries {
            let view = match cache.reduce_json() {
                Ok(view) => view,
                Err(e) => {
                    tracing::warn!(store = %self.name, cache = %key, error = %e, "reduce failed, using raw snapshot");
                    cache.raw_json()?
                }
            };
            views.insert(key.0, view);
        }
        Ok(serde_json::Value::Object(views))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_and_use() {
        let store = Store::new("s");
        let created = store.create_cache::<String, usize>("k").unwrap();
        created.save("hello".to_string(), "a");

        let used = store.use_cache::<String, usize>("k").unwrap();
        assert!(Arc::ptr_eq(&created, &used));
        assert_eq!(used.len(), 1);
    }

    #[test]
    fn test_duplicate_key() {
        let store = Store::new("s");
        let cache = store.create_cache::<u32, u32>("k").unwrap();
        cache.save(1, "a");

        let result = store.create_cache::<u32, u32>("k");
        assert!(matches!(result, Err(StoreError::DuplicateKey(ref k)) if k.as_str() == "k"));
        assert_eq!(store.keys().len(), 1);
        assert_eq!(cache.get_all().data("a"), Some(&1));
    }

    #[test]
    fn test_not_found() {
        let store = Store::new("s");
        let result = store.use_cache::<u32, u32>("missing");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_type_mismatch() {
        let store = Store::new("s");
        store.create_cache::<String, usize>("k").unwrap();

        match store.use_cache::<u64, usize>("k") {
            Err(StoreError::TypeMismatch { key, expected, found }) => {
                assert_eq!(key.as_str(), "k");
                assert!(expected.contains("u64"));
                assert!(found.contains("String"));
            }
            other => panic!("Expected TypeMismatch, got {:?}", other.map(|_| ())),
        }

        // View type is part of the check
        assert!(matches!(
            store.use_cache::<String, u32>("k"),
            Err(StoreError::TypeMismatch { .. })
        ));
        assert!(store.use_cache::<String, usize>("k").is_ok());
    }

    #[test]
    fn test_keys_in_creation_order() {
        let store = Store::new("s");
        store.create_cache::<u32, u32>("b").unwrap();
        store.create_cache::<u32, u32>("a").unwrap();

        let keys = store.keys();
        assert_eq!(keys, vec![StoreKey::from("b"), StoreKey::from("a")]);

        // Snapshot of keys is a copy
        store.create_cache::<u32, u32>("c").unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_snapshot_across_caches() {
        let store = Store::new("s");
        let counts = store.create_cache::<String, usize>("counts").unwrap();
        counts.save("x".to_string(), "a");
        counts.save("y".to_string(), "b");
        counts.set_reducer(|s| s.len());

        let raw = store.create_cache::<u32, serde_json::Value>("raw").unwrap();
        raw.save(5, "n");

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot["counts"], json!(2));
        assert_eq!(snapshot["raw"]["n"]["data"], json!(5));
    }

    #[test]
    fn test_snapshot_isolates_failing_reducer() {
        let store = Store::new("s");
        let good = store.create_cache::<u32, usize>("good").unwrap();
        good.save(1, "a");
        good.set_reducer(|s| s.len());

        let bad = store.create_cache::<u32, u32>("bad").unwrap();
        bad.save(7, "x");
        bad.set_reducer(|_| panic!("bad reducer"));

        let snapshot = store.snapshot().unwrap();
        assert_eq!(snapshot["good"], json!(1));
        assert_eq!(snapshot["bad"]["x"]["data"], json!(7));
    }
}
