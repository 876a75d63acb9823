//! Publisher binding a connection pool to a network endpoint.

use super::binding::BindingRegistry;
use crate::cache::Cache;
use crate::config::{BindingConfig, PublisherConfig};
use crate::connection::{Acceptor, Connection, ConnectionPool, Message, PublishReport, Transport};
use crate::error::{Result, StoreError};
use crate::types::StoreKey;
use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// First pause after a failed accept; doubles on each further failure.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(5);

const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Called once per subscriber, before it joins the pool and before its
/// read/write workers start.
pub type ConnectionHook = Arc<dyn Fn(&Arc<Connection>) + Send + Sync>;

/// Called for every inbound message a subscriber sends.
pub type MessageHook = Arc<dyn Fn(&Arc<Connection>, serde_json::Value) + Send + Sync>;

/// One `{port, path, key}` binding and the subscribers connected to it.
///
/// Creating a publisher claims its port, path and key in a
/// [`BindingRegistry`]; [`shutdown`](Self::shutdown) releases them.
pub struct Publisher {
    config: BindingConfig,
    options: PublisherConfig,
    registry: Arc<BindingRegistry>,
    pool: Arc<ConnectionPool>,
    on_new_connection: RwLock<Option<ConnectionHook>>,
    on_message: RwLock<Option<MessageHook>>,
    acceptors: Mutex<Vec<Arc<dyn Acceptor>>>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
}

impl Publisher {
    /// Claim `config` in `registry` and create an empty publisher.
    pub fn new(
        config: BindingConfig,
        registry: Arc<BindingRegistry>,
        options: PublisherConfig,
    ) -> Result<Arc<Self>> {
        registry.register(&config)?;

        let (shutdown_tx, shutdown_rx) = bounded(0);
        Ok(Arc::new(Self {
            config,
            options,
            registry,
            pool: Arc::new(ConnectionPool::new()),
            on_new_connection: RwLock::new(None),
            on_message: RwLock::new(None),
            acceptors: Mutex::new(Vec::new()),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
        }))
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    pub fn subscribe_path(&self) -> String {
        self.config.subscribe_path()
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn connections(&self) -> Vec<Arc<Connection>> {
        self.pool.connections()
    }

    /// Address of the first acceptor that reports one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.acceptors.lock().iter().find_map(|a| a.local_addr())
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_tx.lock().is_none()
    }

    pub fn set_on_new_connection<F>(&self, hook: F)
    where
        F: Fn(&Arc<Connection>) + Send + Sync + 'static,
    {
        *self.on_new_connection.write() = Some(Arc::new(hook));
    }

    pub fn set_on_message<F>(&self, hook: F)
    where
        F: Fn(&Arc<Connection>, serde_json::Value) + Send + Sync + 'static,
    {
        *self.on_message.write() = Some(Arc::new(hook));
    }

    // --- Subscribers ---

    /// Admit a subscriber over an established transport.
    ///
    /// Runs the new-connection hook, adds the connection to the pool, then
    /// starts its writer and reader threads. Anything the hook enqueues is
    /// ahead of every publish. The connection leaves the pool when its
    /// transport closes.
    pub fn handle_subscribe(self: &Arc<Self>, transport: Arc<dyn Transport>) -> Result<Arc<Connection>> {
        if self.is_shut_down() {
            transport.close();
            return Err(StoreError::Shutdown);
        }

        let conn = Connection::new(transport, self.options.queue_capacity);

        let hook = self.on_new_connection.read().clone();
        if let Some(hook) = hook {
            hook(&conn);
        }

        if let Err(e) = self.pool.add_connection(Arc::clone(&conn)) {
            conn.close();
            return Err(e);
        }

        if let Err(e) = self.spawn_workers(&conn) {
            self.pool.remove_if_current(&conn);
            return Err(e.into());
        }
        Ok(conn)
    }

    fn spawn_workers(self: &Arc<Self>, conn: &Arc<Connection>) -> std::io::Result<()> {
        conn.spawn_writer()?;

        let publisher = Arc::clone(self);
        let reader = Arc::clone(conn);
        thread::Builder::new()
            .name(format!("kaw-read-{}", conn.key()))
            .spawn(move || {
                reader.read_loop(|value| {
                    let hook = publisher.on_message.read().clone();
                    match hook {
                        Some(hook) => hook(&reader, value),
                        None => tracing::trace!(connection = %reader.key(), "ignoring inbound message"),
                    }
                });
                publisher.pool.remove_if_current(&reader);
            })?;
        Ok(())
    }

    // --- Publishing ---

    /// Fan `payload` out to every current subscriber of this binding.
    pub fn publish<M: Serialize + ?Sized>(&self, payload: &M) -> Result<PublishReport> {
        Ok(self.publish_message(&Message::from_serialize(payload)?))
    }

    pub fn publish_message(&self, message: &Message) -> PublishReport {
        self.pool.publish(message)
    }

    /// Relay `cache` to subscribers: each time its feed yields, reduce the
    /// cache and publish `{key: view}`, the same shape as one entry of
    /// [`Store::snapshot`](crate::Store::snapshot).
    ///
    /// Snapshots already buffered are coalesced into one reduce. Reducer
    /// failures are logged and skipped. Stops on shutdown.
    pub fn relay<T, V>(
        self: &Arc<Self>,
        key: impl Into<StoreKey>,
        cache: Arc<Cache<T, V>>,
    ) -> Result<JoinHandle<()>>
    where
        T: Clone + Serialize + Send + Sync + 'static,
        V: Serialize + Send + Sync + 'static,
    {
        if self.is_shut_down() {
            return Err(StoreError::Shutdown);
        }

        let key = key.into();
        let publisher = Arc::clone(self);
        let feed = cache.feed();
        let updates = feed.receiver().clone();
        let shutdown = self.shutdown_rx.clone();

        let handle = thread::Builder::new()
            .name(format!("kaw-relay-{}", key))
            .spawn(move || loop {
                select! {
                    recv(updates) -> snapshot => {
                        if snapshot.is_err() {
                            break;
                        }
                        while feed.try_recv().is_ok() {}

                        match cache.reduce().and_then(|view| keyed_message(&key, &view)) {
                            Ok(message) => {
                                publisher.publish_message(&message);
                            }
                            Err(e) => {
                                tracing::warn!(binding = %publisher.config.key, cache = %key, error = %e, "relay update failed");
                            }
                        }
                    }
                    recv(shutdown) -> _ => break,
                }
            })?;
        Ok(handle)
    }

    // --- Serving ---

    /// Accept subscribers from `acceptor` on a dedicated thread until it
    /// closes or the publisher shuts down.
    pub fn serve(self: &Arc<Self>, acceptor: Arc<dyn Acceptor>) -> Result<JoinHandle<()>> {
        if self.is_shut_down() {
            acceptor.close();
            return Err(StoreError::Shutdown);
        }
        self.acceptors.lock().push(Arc::clone(&acceptor));

        let publisher = Arc::clone(self);
        let shutdown = self.shutdown_rx.clone();
        let handle = thread::Builder::new()
            .name(format!("kaw-accept-{}", self.config.key))
            .spawn(move || {
                let mut backoff = ACCEPT_BACKOFF_MIN;
                while !publisher.is_shut_down() {
                    match acceptor.accept() {
                        Ok(Some(transport)) => {
                            backoff = ACCEPT_BACKOFF_MIN;
                            if let Err(e) = publisher.handle_subscribe(transport) {
                                tracing::debug!(binding = %publisher.config.key, error = %e, "subscribe rejected");
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            tracing::warn!(
                                binding = %publisher.config.key,
                                error = %e,
                                retry_ms = backoff.as_millis() as u64,
                                "accept failed"
                            );
                            // Shutdown drops the sender and ends the wait early
                            if matches!(shutdown.recv_timeout(backoff), Err(RecvTimeoutError::Disconnected)) {
                                break;
                            }
                            backoff = (backoff * 2).min(ACCEPT_BACKOFF_MAX);
                        }
                    }
                }
            })?;
        Ok(handle)
    }

    /// Release the binding, stop relays and acceptors, close all
    /// subscribers. Idempotent.
    pub fn shutdown(&self) {
        if self.shutdown_tx.lock().take().is_none() {
            return;
        }
        self.registry.release(&self.config.port);

        let acceptors: Vec<_> = self.acceptors.lock().drain(..).collect();
        for acceptor in acceptors {
            acceptor.close();
        }
        self.pool.close_all();
        tracing::debug!(binding = %self.config.key, port = %self.config.port, "publisher shut down");
    }
}

fn keyed_message<M: Serialize + ?Sized>(key: &StoreKey, payload: &M) -> Result<Message> {
    let mut update = serde_json::Map::with_capacity(1);
    update.insert(key.as_str().to_string(), serde_json::to_value(payload)?);
    Ok(Message::new(serde_json::Value::Object(update)))
}
