//! # Kaw
//!
//! An in-process store of typed, time-bucketed caches whose derived views
//! are pushed to remote subscribers.
//!
//! ## Core Concepts
//!
//! - **Store**: Named registry of typed caches, one per key
//! - **Cache**: Items keyed by time bucket and key, with one optional reducer
//! - **Feed**: Bounded, lossy channel of bucket snapshots emitted on save
//! - **ConnectionPool**: Subscribers fed without blocking; slow ones are shed
//! - **Publisher**: Binds a store to an endpoint and relays views
//!
//! ## Example
//!
//! ```ignore
//! use kaw::{Kaw, KawConfig};
//!
//! let kaw = Kaw::new(KawConfig::from_env());
//! let store = kaw.create_store("metrics");
//!
//! let hits = store.create_cache::<u64, u64>("hits")?;
//! hits.set_reducer(|snapshot| snapshot.values().map(|item| *item.data()).sum());
//!
//! let publisher = kaw.serve(&store, "/store")?;
//! publisher.relay("hits", hits.clone())?;
//!
//! hits.save(3, "home");
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod context;
pub mod error;
pub mod publisher;
pub mod store;
pub mod types;

// Re-exports
pub use cache::{BucketSnapshot, Cache, FeedHandle, Reducer, Snapshot, View};
pub use config::{BindingConfig, CacheConfig, KawConfig, PublisherConfig};
pub use connection::{
    Acceptor, Connection, ConnectionPool, MemoryPeer, MemoryTransport, Message, PublishReport,
    TcpAcceptor, TcpTransport, Transport,
};
pub use context::{CommandListener, Kaw, StaticAssets};
pub use error::{BindingConflict, Result, StoreError};
pub use publisher::{BindingRegistry, ConnectionHook, MessageHook, Publisher};
pub use store::Store;
pub use types::*;
