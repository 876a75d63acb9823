//! Configuration for caches, bindings and publishers.

use crate::error::{Result, StoreError};
use std::time::Duration;

/// Default width of a cache time bucket.
pub const DEFAULT_BUCKET_GRANULARITY: Duration = Duration::from_secs(1);

/// Default number of bucket snapshots buffered on a cache feed.
pub const DEFAULT_FEED_CAPACITY: usize = 64;

/// Default outbound queue capacity per subscriber connection.
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;

/// Port used when neither the config nor the environment names one.
pub const DEFAULT_PORT: &str = ":8080";

/// Environment variable consulted for the serving port.
pub const PORT_ENV: &str = "KACHE_KROW_PORT";

/// Cache configuration. Fixed for the lifetime of the cache.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    /// Width of the interval items are grouped into.
    /// Default: 1s
    pub bucket_granularity: Duration,

    /// Max buffered feed snapshots before new ones are dropped. Zero is
    /// treated as one.
    /// Default: 64
    pub feed_capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            bucket_granularity: DEFAULT_BUCKET_GRANULARITY,
            feed_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

/// A `{port, path, key}` triple identifying one network binding.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingConfig {
    pub port: String,
    pub path: String,
    pub key: String,
}

impl BindingConfig {
    /// Build a binding config, trimming surrounding whitespace.
    pub fn new(port: impl Into<String>, path: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            port: port.into().trim().to_string(),
            path: path.into().trim().to_string(),
            key: key.into().trim().to_string(),
        }
    }

    /// Reject configurations that can never be bound.
    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(StoreError::EmptyPath);
        }
        Ok(())
    }

    /// Upgrade path subscribers connect through.
    pub fn subscribe_path(&self) -> String {
        format!("{}/ws/subscribe", self.path.trim_end_matches('/'))
    }

    /// Socket address for the port, accepting the `":8080"` shorthand.
    pub fn socket_addr(&self) -> String {
        if self.port.starts_with(':') {
            format!("0.0.0.0{}", self.port)
        } else {
            self.port.clone()
        }
    }
}

/// Publisher configuration.
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    /// Outbound messages buffered per connection before it is evicted.
    /// Zero is treated as one.
    /// Default: 16
    pub queue_capacity: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// Top-level configuration for a [`Kaw`](crate::Kaw) context.
#[derive(Clone, Debug)]
pub struct KawConfig {
    /// Explicit port. When `None`, the environment and then
    /// [`DEFAULT_PORT`] are used.
    pub port: Option<String>,

    /// Environment variable holding the port number.
    pub port_env: String,

    /// Config applied to caches created through the context.
    pub cache: CacheConfig,

    /// Config applied to publishers started through the context.
    pub publisher: PublisherConfig,
}

impl Default for KawConfig {
    fn default() -> Self {
        Self {
            port: None,
            port_env: PORT_ENV.to_string(),
            cache: CacheConfig::default(),
            publisher: PublisherConfig::default(),
        }
    }
}

impl KawConfig {
    /// Default config with the port taken from the environment, if set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.port = std::env::var(&config.port_env)
            .ok()
            .and_then(|port| port_from_env_value(&port));
        config
    }

    /// The port to serve on: explicit, then environment, then default.
    pub fn resolve_port(&self) -> String {
        self.port
            .clone()
            .or_else(|| {
                std::env::var(&self.port_env)
                    .ok()
                    .and_then(|port| port_from_env_value(&port))
            })
            .unwrap_or_else(|| DEFAULT_PORT.to_string())
    }
}

fn port_from_env_value(value: &str) -> Option<String> {
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(format!(":{}", value.trim_start_matches(':')))
    }
}
