//! Newline-delimited JSON over TCP.

use super::transport::{Acceptor, Message, Transport};
use crate::config::BindingConfig;
use crate::error::{Result, StoreError};
use crate::types::ConnectionKey;
use parking_lot::Mutex;
use std::io::{self, BufRead, BufReader, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// One JSON document per line in each direction.
pub struct TcpTransport {
    identity: ConnectionKey,
    stream: TcpStream,
    reader: Mutex<BufReader<TcpStream>>,
    writer: Mutex<TcpStream>,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let identity = ConnectionKey::new(stream.peer_addr()?.to_string());
        Ok(Self {
            identity,
            reader: Mutex::new(BufReader::new(stream.try_clone()?)),
            writer: Mutex::new(stream.try_clone()?),
            stream,
        })
    }
}

impl Transport for TcpTransport {
    fn identity(&self) -> ConnectionKey {
        self.identity.clone()
    }

    fn send(&self, message: &Message) -> io::Result<()> {
        let mut line = serde_json::to_vec(message.value())?;
        line.push(b'\n');

        let mut writer = self.writer.lock();
        writer.write_all(&line)?;
        writer.flush()
    }

    fn recv(&self) -> io::Result<Option<serde_json::Value>> {
        let mut reader = self.reader.lock();
        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e));
        }
    }

    fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

/// Listener producing a [`TcpTransport`] per accepted stream.
pub struct TcpAcceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    closed: AtomicBool,
}

impl TcpAcceptor {
    /// Bind the port named by `config`.
    ///
    /// Failure is fatal for the binding and is not retried.
    pub fn bind(config: &BindingConfig) -> Result<Self> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(&addr).map_err(|source| StoreError::Bind {
            addr: addr.clone(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        tracing::debug!(%local_addr, path = %config.path, "listening");
        Ok(Self {
            listener,
            local_addr,
            closed: AtomicBool::new(false),
        })
    }
}

impl Acceptor for TcpAcceptor {
    fn accept(&self) -> io::Result<Option<Arc<dyn Transport>>> {
        let (stream, _) = self.listener.accept()?;
        if self.closed.load(Ordering::Acquire) {
            return Ok(None);
        }
        Ok(Some(Arc::new(TcpTransport::new(stream)?)))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Wake a thread blocked in accept()
        let mut wake = self.local_addr;
        if wake.ip().is_unspecified() {
            wake.set_ip(match wake.ip() {
                IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            });
        }
        let _ = TcpStream::connect(wake);
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        Some(self.local_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tcp_line_roundtrip() {
        let acceptor = TcpAcceptor::bind(&BindingConfig::new("127.0.0.1:0", "/t", "t")).unwrap();
        let addr = acceptor.local_addr().unwrap();

        let mut client = TcpStream::connect(addr).unwrap();
        let transport = acceptor.accept().unwrap().unwrap();

        transport.send(&Message::new(json!({"hello": "world"}))).unwrap();
        let mut line = String::new();
        BufReader::new(client.try_clone().unwrap())
            .read_line(&mut line)
            .unwrap();
        assert_eq!(
            serde_json::from_str::<serde_json::Value>(&line).unwrap(),
            json!({"hello": "world"})
        );

        client.write_all(b"\n{\"ping\":1}\n").unwrap();
        assert_eq!(transport.recv().unwrap(), Some(json!({"ping": 1})));

        drop(client);
        assert_eq!(transport.recv().unwrap(), None);
    }

    #[test]
    fn test_bind_failure_is_reported() {
        let first = TcpAcceptor::bind(&BindingConfig::new("127.0.0.1:0", "/a", "a")).unwrap();
        let taken = first.local_addr().unwrap().to_string();

        let result = TcpAcceptor::bind(&BindingConfig::new(taken, "/b", "b"));
        assert!(matches!(result, Err(StoreError::Bind { .. })));
    }

    #[test]
    fn test_close_wakes_accept() {
        let config = BindingConfig::new("127.0.0.1:0", "/c", "c");
        let acceptor = Arc::new(TcpAcceptor::bind(&config).unwrap());
        let waiting = Arc::clone(&acceptor);
        let handle = std::thread::spawn(move || waiting.accept().map(|t| t.is_none()));

        acceptor.close();
        assert!(handle.join().unwrap().unwrap());
    }
}
