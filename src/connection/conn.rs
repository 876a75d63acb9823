//! A single subscriber connection with a bounded outbound queue.

use super::transport::{Message, Transport};
use crate::types::ConnectionKey;
use crossbeam_channel::{bounded, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Subscriber identity, outbound queue and transport.
///
/// Messages are enqueued without blocking and written to the transport by
/// a dedicated writer thread. Once closed a connection accepts nothing.
pub struct Connection {
    key: ConnectionKey,
    capacity: usize,
    queue_tx: Sender<Message>,
    queue_rx: Receiver<Message>,
    transport: Arc<dyn Transport>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    closed: AtomicBool,
}

impl Connection {
    /// Wrap `transport` with an outbound queue of `capacity` messages.
    ///
    /// A zero capacity is raised to one so a message can be queued before
    /// the writer starts.
    pub fn new(transport: Arc<dyn Transport>, capacity: usize) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (queue_tx, queue_rx) = bounded(capacity);
        let (shutdown_tx, shutdown_rx) = bounded(0);
        Arc::new(Self {
            key: transport.identity(),
            capacity,
            queue_tx,
            queue_rx,
            transport,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            closed: AtomicBool::new(false),
        })
    }

    pub fn key(&self) -> &ConnectionKey {
        &self.key
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Messages waiting for the writer.
    pub fn queued(&self) -> usize {
        self.queue_rx.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Enqueue `message` without blocking.
    ///
    /// Returns false if the connection is closed or its queue is full.
    pub fn try_publish(&self, message: Message) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.queue_tx.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => false,
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Close the transport and stop the writer. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown_tx.lock().take();
        self.transport.close();
        tracing::debug!(connection = %self.key, "connection closed");
    }

    /// Start the writer thread draining the queue into the transport.
    pub(crate) fn spawn_writer(self: &Arc<Self>) -> io::Result<JoinHandle<()>> {
        let conn = Arc::clone(self);
        thread::Builder::new()
            .name(format!("kaw-write-{}", self.key))
            .spawn(move || conn.write_loop())
    }

    fn write_loop(&self) {
        loop {
            select! {
                recv(self.queue_rx) -> message => {
                    let Ok(message) = message else { break };
                    if let Err(e) = self.transport.send(&message) {
                        tracing::debug!(connection = %self.key, error = %e, "write failed");
                        self.close();
                        break;
                    }
                }
                recv(self.shutdown_rx) -> _ => break,
            }
        }
    }

    /// Read inbound messages until the transport closes or fails.
    pub(crate) fn read_loop<F>(&self, mut on_message: F)
    where
        F: FnMut(serde_json::Value),
    {
        while !self.is_closed() {
            match self.transport.recv() {
                Ok(Some(value)) => on_message(value),
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(connection = %self.key, error = %e, "read failed");
                    break;
                }
            }
        }
        self.close();
    }
}
