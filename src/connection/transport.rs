//! Transport seam between connections and the outside world.

use crate::error::Result;
use crate::types::ConnectionKey;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Payload fanned out to subscribers. Cloning shares the encoded value.
#[derive(Clone, Debug, PartialEq)]
pub struct Message(Arc<serde_json::Value>);

impl Message {
    pub fn new(value: serde_json::Value) -> Self {
        Message(Arc::new(value))
    }

    /// Encode any serializable payload.
    pub fn from_serialize<M: Serialize + ?Sized>(payload: &M) -> Result<Self> {
        Ok(Message::new(serde_json::to_value(payload)?))
    }

    pub fn value(&self) -> &serde_json::Value {
        &self.0
    }
}

impl From<serde_json::Value> for Message {
    fn from(value: serde_json::Value) -> Self {
        Message::new(value)
    }
}

/// An established bidirectional connection to one subscriber.
///
/// Upgrade and framing are the implementor's concern. `send` and `recv`
/// are called from different worker threads.
pub trait Transport: Send + Sync + 'static {
    /// Identity used as the connection key.
    fn identity(&self) -> ConnectionKey;

    /// Write one message. May block on the peer.
    fn send(&self, message: &Message) -> io::Result<()>;

    /// Block for the next inbound message. `Ok(None)` on orderly close.
    fn recv(&self) -> io::Result<Option<serde_json::Value>>;

    /// Release the transport. Pending `send`/`recv` calls must return.
    fn close(&self);
}

/// Source of newly established transports for a binding.
pub trait Acceptor: Send + Sync + 'static {
    /// Block for the next subscriber. `Ok(None)` once closed.
    fn accept(&self) -> io::Result<Option<Arc<dyn Transport>>>;

    /// Stop accepting and wake a blocked `accept`.
    fn close(&self);

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }
}

fn broken_pipe() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "transport closed")
}

/// In-process transport, one end of a [`MemoryTransport::pair`].
pub struct MemoryTransport {
    identity: ConnectionKey,
    outbound: Sender<Message>,
    inbound: Receiver<serde_json::Value>,
    closed_tx: Mutex<Option<Sender<()>>>,
    closed_rx: Receiver<()>,
}

/// Subscriber side of a [`MemoryTransport`].
pub struct MemoryPeer {
    received: Receiver<Message>,
    to_server: Sender<serde_json::Value>,
}

impl MemoryTransport {
    /// Transport whose sends never block.
    pub fn pair(identity: impl Into<ConnectionKey>) -> (Arc<Self>, MemoryPeer) {
        Self::build(identity.into(), unbounded())
    }

    /// Transport whose sends block once `capacity` messages are unread,
    /// simulating a subscriber that stops draining.
    pub fn bounded_pair(identity: impl Into<ConnectionKey>, capacity: usize) -> (Arc<Self>, MemoryPeer) {
        Self::build(identity.into(), bounded(capacity))
    }

    fn build(
        identity: ConnectionKey,
        (outbound, received): (Sender<Message>, Receiver<Message>),
    ) -> (Arc<Self>, MemoryPeer) {
        let (to_server, inbound) = unbounded();
        let (closed_tx, closed_rx) = bounded(0);
        let transport = Arc::new(Self {
            identity,
            outbound,
            inbound,
            closed_tx: Mutex::new(Some(closed_tx)),
            closed_rx,
        });
        (transport, MemoryPeer { received, to_server })
    }

    pub fn is_closed(&self) -> bool {
        self.closed_tx.lock().is_none()
    }
}

impl Transport for MemoryTransport {
    fn identity(&self) -> ConnectionKey {
        self.identity.clone()
    }

    fn send(&self, message: &Message) -> io::Result<()> {
        if self.is_closed() {
            return Err(broken_pipe());
        }
        select! {
            send(self.outbound, message.clone()) -> res => res.map_err(|_| broken_pipe()),
            recv(self.closed_rx) -> _ => Err(broken_pipe()),
        }
    }

    fn recv(&self) -> io::Result<Option<serde_json::Value>> {
        select! {
            recv(self.inbound) -> msg => Ok(msg.ok()),
            recv(self.closed_rx) -> _ => Ok(None),
        }
    }

    fn close(&self) {
        // Dropping the sender disconnects `closed_rx`, waking blocked calls
        self.closed_tx.lock().take();
    }
}

impl MemoryPeer {
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        self.received.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<Message> {
        self.received.try_recv().ok()
    }

    /// Send a message to the server side. Returns false once it is gone.
    pub fn send(&self, value: serde_json::Value) -> bool {
        self.to_server.send(value).is_ok()
    }

    /// Hang up; the server's read loop ends.
    pub fn disconnect(self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_memory_roundtrip() {
        let (transport, peer) = MemoryTransport::pair("a");
        transport.send(&Message::new(json!({"n": 1}))).unwrap();
        assert_eq!(peer.try_recv().unwrap().value(), &json!({"n": 1}));

        assert!(peer.send(json!("hi")));
        assert_eq!(transport.recv().unwrap(), Some(json!("hi")));
    }

    #[test]
    fn test_memory_close_unblocks() {
        let (transport, _peer) = MemoryTransport::bounded_pair("a", 0);
        transport.close();
        assert!(transport.send(&Message::new(json!(1))).is_err());
        assert_eq!(transport.recv().unwrap(), None);
    }

    #[test]
    fn test_memory_peer_disconnect_ends_recv() {
        let (transport, peer) = MemoryTransport::pair("a");
        peer.disconnect();
        assert_eq!(transport.recv().unwrap(), None);
        assert!(transport.send(&Message::new(json!(1))).is_err());
    }
}
