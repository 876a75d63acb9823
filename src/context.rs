//! Process context tying stores to network bindings.

use crate::config::{BindingConfig, KawConfig};
use crate::connection::{Connection, Message, TcpAcceptor};
use crate::error::Result;
use crate::publisher::{BindingRegistry, Publisher};
use crate::store::Store;
use parking_lot::Mutex;
use std::sync::Arc;

/// Serves static assets under a base path. Provided by the embedder.
pub trait StaticAssets {
    fn serve_static(&self, base_path: &str) -> Result<()>;
}

/// Starts accepting interactive commands. Provided by the embedder.
pub trait CommandListener {
    fn listen_commands(&self) -> Result<()>;
}

/// Explicit context constructed once at process start.
///
/// Owns the binding registry and every publisher started through it, so
/// independent contexts (one per test, say) never share state.
pub struct Kaw {
    config: KawConfig,
    bindings: Arc<BindingRegistry>,
    publishers: Mutex<Vec<Arc<Publisher>>>,
}

impl Kaw {
    pub fn new(config: KawConfig) -> Self {
        Self {
            config,
            bindings: Arc::new(BindingRegistry::new()),
            publishers: Mutex::new(Vec::new()),
        }
    }

    /// Context configured from the environment.
    pub fn from_env() -> Self {
        Self::new(KawConfig::from_env())
    }

    pub fn config(&self) -> &KawConfig {
        &self.config
    }

    pub fn bindings(&self) -> &Arc<BindingRegistry> {
        &self.bindings
    }

    /// Invoke the embedder's asset and command collaborators once.
    pub fn bootstrap(&self, assets: &dyn StaticAssets, commands: &dyn CommandListener) -> Result<()> {
        tracing::info!("Kaching At Will");
        assets.serve_static("")?;
        commands.listen_commands()
    }

    /// New store whose caches use the context's cache config.
    pub fn create_store(&self, name: impl Into<String>) -> Arc<Store> {
        Arc::new(Store::with_cache_config(name, self.config.cache.clone()))
    }

    /// Bind `store` to `{port, path}` without opening a socket.
    ///
    /// The binding key is the store name. Every new subscriber first
    /// receives [`Store::snapshot`]; it is queued before the subscriber
    /// joins the pool, so no live update can precede it.
    pub fn bind(&self, store: &Arc<Store>, port: &str, path: &str) -> Result<Arc<Publisher>> {
        let config = BindingConfig::new(port, path, store.name());
        let publisher = Publisher::new(
            config,
            Arc::clone(&self.bindings),
            self.config.publisher.clone(),
        )?;

        let bootstrap_store = Arc::clone(store);
        publisher.set_on_new_connection(move |conn| push_bootstrap(&bootstrap_store, conn));

        self.publishers.lock().push(Arc::clone(&publisher));
        Ok(publisher)
    }

    /// Bind `store` on the resolved port and accept TCP subscribers.
    pub fn serve(&self, store: &Arc<Store>, path: &str) -> Result<Arc<Publisher>> {
        let port = self.config.resolve_port();
        self.serve_on(store, &port, path)
    }

    /// Bind `store` on `port` and accept TCP subscribers.
    ///
    /// If the socket cannot be bound the binding is released again and the
    /// error returned; nothing is retried.
    pub fn serve_on(&self, store: &Arc<Store>, port: &str, path: &str) -> Result<Arc<Publisher>> {
        let publisher = self.bind(store, port, path)?;

        let started = TcpAcceptor::bind(publisher.config())
            .and_then(|acceptor| publisher.serve(Arc::new(acceptor)));
        if let Err(e) = started {
            self.stop(&publisher);
            return Err(e);
        }

        tracing::info!(
            store = store.name(),
            port = %publisher.config().port,
            subscribe = %publisher.subscribe_path(),
            "serving store"
        );
        Ok(publisher)
    }

    /// Publishers started through this context and not yet stopped.
    pub fn publishers(&self) -> Vec<Arc<Publisher>> {
        self.publishers.lock().clone()
    }

    /// Shut down one publisher and forget it.
    pub fn stop(&self, publisher: &Arc<Publisher>) {
        publisher.shutdown();
        self.publishers
            .lock()
            .retain(|p| !Arc::ptr_eq(p, publisher));
    }

    /// Shut down every publisher.
    pub fn shutdown(&self) {
        let publishers: Vec<_> = self.publishers.lock().drain(..).collect();
        for publisher in publishers {
            publisher.shutdown();
        }
    }
}

impl Default for Kaw {
    fn default() -> Self {
        Self::new(KawConfig::default())
    }
}

fn push_bootstrap(store: &Store, conn: &Arc<Connection>) {
    match store.snapshot() {
        Ok(snapshot) => {
            if !conn.try_publish(Message::new(snapshot)) {
                tracing::warn!(store = store.name(), connection = %conn.key(), "bootstrap not accepted, closing");
                conn.close();
            }
        }
        Err(e) => {
            tracing::warn!(store = store.name(), connection = %conn.key(), error = %e, "bootstrap snapshot failed");
        }
    }
}
