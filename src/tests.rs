//! End-to-end scenarios spanning more than one module, exercised through the
//! public API rather than any single unit. Per-module edge cases live next
//! to the code they cover; this file is for the wiring between them.

use crate::cache::PacketCache;
use crate::events;
use crate::packet::{Frame, Parser};
use crate::serial::SerialTransport;
use crate::settings::ConnectionSettings;
use crate::tcp::{Network, NetworkManager};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Binds an ephemeral port, records it, and releases it immediately so a
/// `Network` can bind the same port moments later.
fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

async fn connect(port: u16) -> TcpStream {
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    for _ in 0..50 {
        if let Ok(stream) = TcpStream::connect(addr).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("couldn't connect to test listener on {addr}");
}

fn sample_frame(body: &[u8]) -> Vec<u8> {
    Frame::build(0xFB, 0xFF, body).as_bytes().to_vec()
}

/// Scenario: a client's own frame, once registered and fanned back out via
/// the Network, is not echoed to it, but a second, unrelated client does
/// receive it.
#[tokio::test]
async fn own_echo_suppressed_other_clients_unaffected() {
    let port = free_port();
    let settings = ConnectionSettings {
        port,
        relay: true,
        ..Default::default()
    };
    let cache = PacketCache::new();
    let (senders, mut receivers) = events::channel();
    let network = Arc::new(Network::new(settings, cache.clone(), senders).unwrap());
    network.start().await;

    let mut sender_side = connect(port).await;
    let mut other_side = connect(port).await;

    let bytes = sample_frame(&[0x40]);
    sender_side.write_all(&bytes).await.unwrap();

    let id = loop {
        match receivers.tcp_receive.recv().await {
            Some(events::TcpReceive(id)) => break id,
            None => panic!("tcp_receive channel closed"),
        }
    };

    // Fan the frame back out: the originating client suppresses it, the
    // other client receives it.
    network.send(id).await;

    let mut buf = [0u8; 6];
    let read = tokio::time::timeout(Duration::from_secs(1), other_side.read_exact(&mut buf))
        .await
        .expect("other client should receive the frame")
        .unwrap();
    assert_eq!(read, 6);
    assert_eq!(&buf, bytes.as_slice());

    // The sender must not have received anything: race a short read against
    // a timeout and expect the timeout to win.
    let mut echo_buf = [0u8; 6];
    let result = tokio::time::timeout(Duration::from_millis(200), sender_side.read(&mut echo_buf)).await;
    assert!(result.is_err(), "sender should not observe its own frame echoed back");

    network.stop().await;
}

/// Scenario: a connection with auth enabled closes on a key mismatch and
/// never shows up in a subsequent fan-out.
#[tokio::test]
async fn auth_mismatch_closes_connection() {
    let port = free_port();
    let settings = ConnectionSettings {
        port,
        relay: true,
        auth: true,
        auth_key: "velbus".to_string(),
        ..Default::default()
    };
    let cache = PacketCache::new();
    let (senders, _receivers) = events::channel();
    let network = Arc::new(Network::new(settings, cache, senders).unwrap());
    network.start().await;

    let mut stream = connect(port).await;
    stream.write_all(b"other\n").await.unwrap();

    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(Duration::from_secs(1), stream.read(&mut buf))
        .await
        .expect("read should not hang")
        .unwrap();
    assert_eq!(n, 0, "server should close the connection on auth mismatch");

    network.stop().await;
}

/// Scenario: a correct auth key lets the packet loop run normally.
#[tokio::test]
async fn auth_match_admits_client() {
    let port = free_port();
    let settings = ConnectionSettings {
        port,
        relay: true,
        auth: true,
        auth_key: "velbus".to_string(),
        ..Default::default()
    };
    let cache = PacketCache::new();
    let (senders, mut receivers) = events::channel();
    let network = Arc::new(Network::new(settings, cache, senders).unwrap());
    network.start().await;

    let mut stream = connect(port).await;
    stream.write_all(b"velbus\n").await.unwrap();
    stream.write_all(&sample_frame(&[0x01])).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), receivers.tcp_receive.recv())
        .await
        .expect("should observe a tcp-receive event")
        .expect("channel open");
    let events::TcpReceive(_id) = received;

    network.stop().await;
}

/// Scenario: a `NetworkManager` composed of two `Network`s forwards a
/// fan-out send to both, with no ordering guarantee required between them.
#[tokio::test]
async fn network_manager_fans_out_to_every_network() {
    let port_a = free_port();
    let port_b = free_port();
    let cache = PacketCache::new();
    let (senders, _receivers) = events::channel();

    let connections = vec![
        ConnectionSettings {
            port: port_a,
            relay: true,
            ..Default::default()
        },
        ConnectionSettings {
            port: port_b,
            relay: true,
            ..Default::default()
        },
    ];
    let manager = NetworkManager::new(&connections, cache.clone(), senders).unwrap();
    manager.start().await;

    let mut client_a = connect(port_a).await;
    let mut client_b = connect(port_b).await;

    let frame = Frame::build(0xFB, 0x00, &[0x02]);
    let id = cache.insert(frame.clone());

    manager.send(id).await;

    let mut buf_a = [0u8; 6];
    let mut buf_b = [0u8; 6];
    tokio::time::timeout(Duration::from_secs(1), client_a.read_exact(&mut buf_a))
        .await
        .unwrap()
        .unwrap();
    tokio::time::timeout(Duration::from_secs(1), client_b.read_exact(&mut buf_b))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&buf_a, frame.as_bytes());
    assert_eq!(&buf_b, frame.as_bytes());

    manager.stop().await;
}

/// Scenario: a `Network` with relaying disabled never transmits, even when
/// asked to fan out a cached frame.
#[tokio::test]
async fn relay_disabled_network_never_sends() {
    let port = free_port();
    let settings = ConnectionSettings {
        port,
        relay: false,
        ..Default::default()
    };
    let cache = PacketCache::new();
    let (senders, _receivers) = events::channel();
    let network = Arc::new(Network::new(settings, cache.clone(), senders).unwrap());
    network.start().await;

    let mut client = connect(port).await;
    let frame = Frame::build(0xFB, 0x00, &[0x03]);
    let id = cache.insert(frame);
    network.send(id).await;

    let mut buf = [0u8; 6];
    let result = tokio::time::timeout(Duration::from_millis(200), client.read(&mut buf)).await;
    assert!(result.is_err(), "a non-relaying network must not transmit");

    network.stop().await;
}

/// The writer queue is bounded at `MAX_BUFFER_LENGTH`; once saturated,
/// further enqueues are rejected without touching any already-queued frame.
#[test]
fn serial_writer_queue_is_bounded() {
    let cache = PacketCache::new();
    let (senders, _receivers) = events::channel();
    let settings = crate::settings::SerialSettings {
        port: String::new(),
        autodiscover: false,
    };
    let transport = SerialTransport::new(settings, cache.clone(), senders);

    for _ in 0..crate::serial::MAX_BUFFER_LENGTH {
        let id = cache.insert(Frame::build(0xFB, 0x00, &[0x01]));
        transport.send(id).expect("queue has room");
    }

    let overflow_id = cache.insert(Frame::build(0xFB, 0x00, &[0x02]));
    assert!(transport.send(overflow_id).is_err(), "queue should reject past capacity");
}

/// A raw byte stream crossing the bus-ingest path (parser -> cache) and a
/// TCP-ingest path (parser -> cache) both resolve to the same frame bytes
/// regardless of which parser instance decoded them, since `Frame` carries
/// the wire bytes directly.
#[test]
fn bus_and_tcp_parsers_decode_identical_bytes_equivalently() {
    let bytes = sample_frame(&[0x06]);

    let mut bus_parser = Parser::new();
    let mut tcp_parser = Parser::new();

    let bus_frames = bus_parser.feed(&bytes);
    let tcp_frames = tcp_parser.feed(&bytes);

    assert_eq!(bus_frames.len(), 1);
    assert_eq!(tcp_frames.len(), 1);
    assert_eq!(bus_frames[0].as_bytes(), tcp_frames[0].as_bytes());
}
