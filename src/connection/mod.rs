//! Subscriber connections and the pool that fans messages out to them.
//!
//! Each [`Connection`] owns a bounded outbound queue drained by its own
//! writer thread. [`ConnectionPool::publish`] never blocks: a subscriber
//! whose queue is full is closed and removed instead of slowing the
//! publisher or anyone else.
//!
//! Transports are external collaborators behind the [`Transport`] trait.
//! Two are provided: [`MemoryTransport`] for in-process use and
//! [`TcpTransport`] speaking newline-delimited JSON.

mod conn;
mod pool;
mod tcp;
mod transport;

pub use conn::Connection;
pub use pool::{ConnectionPool, PublishReport};
pub use tcp::{TcpAcceptor, TcpTransport};
pub use transport::{Acceptor, MemoryPeer, MemoryTransport, Message, Transport};
