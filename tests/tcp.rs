//! End-to-end tests over the TCP transport.

use kaw::{Kaw, KawConfig};
use serde_json::{json, Value};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn local_kaw() -> Kaw {
    Kaw::new(KawConfig {
        port: Some("127.0.0.1:0".to_string()),
        ..Default::default()
    })
}

fn read_json(reader: &mut BufReader<TcpStream>) -> Value {
    let mut line = String::new();
    reader.read_line(&mut line).unwrap();
    serde_json::from_str(&line).unwrap()
}

fn connect(addr: std::net::SocketAddr) -> (TcpStream, BufReader<TcpStream>) {
    let stream = TcpStream::connect(addr).unwrap();
    stream.set_read_timeout(Some(TIMEOUT)).unwrap();
    let reader = BufReader::new(stream.try_clone().unwrap());
    (stream, reader)
}

#[test]
fn test_subscribe_over_tcp() {
    init_tracing();
    let kaw = local_kaw();
    let store = kaw.create_store("s");
    let cache = store.create_cache::<String, usize>("greetings").unwrap();
    cache.set_reducer(|snapshot| snapshot.len());
    cache.save("hello".to_string(), "a");

    let publisher = kaw.serve(&store, "/store").unwrap();
    assert_eq!(publisher.subscribe_path(), "/store/ws/subscribe");
    let addr = publisher.local_addr().unwrap();

    let (_stream, mut reader) = connect(addr);
    assert_eq!(read_json(&mut reader), json!({"greetings": 1}));

    // Discard the snapshot left on the feed by the first save
    let feed = cache.feed();
    while feed.try_recv().is_ok() {}

    let relay = publisher.relay("greetings", Arc::clone(&cache)).unwrap();
    cache.save("world".to_string(), "b");
    assert_eq!(read_json(&mut reader), json!({"greetings": 2}));

    kaw.shutdown();
    relay.join().unwrap();

    // Server closed the stream
    let mut rest = String::new();
    assert_eq!(reader.read_line(&mut rest).unwrap_or(0), 0);
}

#[test]
fn test_client_hangup_removes_connection() {
    init_tracing();
    let kaw = local_kaw();
    let store = kaw.create_store("s");
    let publisher = kaw.serve(&store, "/store").unwrap();
    let addr = publisher.local_addr().unwrap();

    let (mut stream, mut reader) = connect(addr);
    assert_eq!(read_json(&mut reader), json!({}));
    stream.write_all(b"{\"cmd\":\"noop\"}\n").unwrap();
    assert_eq!(publisher.connections().len(), 1);

    drop(reader);
    drop(stream);

    let deadline = Instant::now() + TIMEOUT;
    while !publisher.connections().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert!(publisher.connections().is_empty());
    kaw.shutdown();
}

#[test]
fn test_shutdown_frees_port_binding() {
    init_tracing();
    let kaw = local_kaw();
    let store = kaw.create_store("s");
    let publisher = kaw.serve(&store, "/store").unwrap();
    assert_eq!(kaw.bindings().len(), 1);

    kaw.stop(&publisher);
    assert!(publisher.is_shut_down());
    assert!(kaw.bindings().is_empty());

    let again = kaw.serve(&store, "/store").unwrap();
    assert!(again.local_addr().is_some());
    kaw.shutdown();
}
