//! End-to-end tests for the broadcast server over loopback TCP

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chatwire::core::frame::encode;
use chatwire::protocol::message::RELAY_OVERHEAD;
use chatwire::{
    BroadcastServer, CipherSuite, Client, ConnectionId, NetworkConfig, ProtocolError,
};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const WAIT: Duration = Duration::from_secs(10);

fn config(encryption: Option<CipherSuite>) -> NetworkConfig {
    NetworkConfig::default_with_overrides(|c| {
        c.server.address = "127.0.0.1:0".into();
        c.server.shutdown_timeout = Duration::from_secs(2);
        if let Some(suite) = encryption {
            c.transport.encryption_enabled = true;
            c.transport.cipher_suite = suite;
        }
    })
}

struct Harness {
    server: BroadcastServer,
    addr: String,
    config: NetworkConfig,
    task: JoinHandle<chatwire::Result<()>>,
}

impl Harness {
    async fn start(config: NetworkConfig) -> Self {
        let server = BroadcastServer::bind(&config).await.expect("Server should bind");
        let addr = server.local_addr().unwrap().to_string();
        let running = server.clone();
        let task = tokio::spawn(async move { running.run().await });
        Self {
            server,
            addr,
            config,
            task,
        }
    }

    /// Connect and wait until the server has registered the new client
    async fn join(&self) -> Client {
        let before = self.server.connection_count().unwrap();
        let client = Client::connect_to(&self.addr, &self.config)
            .await
            .expect("Client should connect");
        self.wait_for_count(before + 1).await;
        client
    }

    async fn wait_for_count(&self, expected: usize) {
        tokio::time::timeout(WAIT, async {
            while self.server.connection_count().unwrap() != expected {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("Server never reached {expected} connections"));
    }

    async fn stop(self) {
        self.server.shutdown().await.unwrap();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("Run loop should stop")
            .unwrap()
            .unwrap();
    }
}

async fn recv(client: &mut Client) -> String {
    tokio::time::timeout(WAIT, client.receive())
        .await
        .expect("Timed out waiting for a message")
        .expect("Receive should succeed")
}

async fn assert_silent(client: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(200), client.receive()).await;
    assert!(result.is_err(), "Expected no message, got {result:?}");
}

fn ids(raw: &[u64]) -> Vec<ConnectionId> {
    raw.iter().copied().map(ConnectionId::new).collect()
}

#[tokio::test]
async fn test_message_relayed_to_everyone_but_sender() {
    let harness = Harness::start(config(None)).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;
    let mut c = harness.join().await;

    a.send("hi").await.unwrap();

    let expected = format!("[1] {}: hi", a.local_addr());
    assert_eq!(recv(&mut b).await, expected);
    assert_eq!(recv(&mut c).await, expected);
    assert_silent(&mut a).await;

    harness.stop().await;
}

#[tokio::test]
async fn test_messages_from_one_sender_keep_order() {
    let harness = Harness::start(config(None)).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;

    for i in 0..20 {
        a.send(&format!("m{i}")).await.unwrap();
    }
    for i in 0..20 {
        assert_eq!(recv(&mut b).await, format!("[1] {}: m{i}", a.local_addr()));
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_broadcast_exclusion() {
    let harness = Harness::start(config(None)).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;
    let mut c = harness.join().await;
    assert_eq!(harness.server.connection_ids().unwrap(), ids(&[1, 2, 3]));

    let report = harness
        .server
        .broadcast("skip two", Some(ConnectionId::new(2)))
        .await
        .unwrap();
    assert_eq!(report.delivered, ids(&[1, 3]));
    assert!(report.failed.is_empty());
    assert_eq!(recv(&mut a).await, "skip two");
    assert_eq!(recv(&mut c).await, "skip two");
    assert_silent(&mut b).await;

    let report = harness.server.broadcast("everyone", None).await.unwrap();
    assert_eq!(report.delivered, ids(&[1, 2, 3]));
    assert_eq!(report.delivered_count(), 3);
    for client in [&mut a, &mut b, &mut c] {
        assert_eq!(recv(client).await, "everyone");
    }

    harness.stop().await;
}

#[tokio::test]
async fn test_disconnect_removes_and_announces() {
    let harness = Harness::start(config(None)).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;
    let c = harness.join().await;
    let c_addr = c.local_addr();

    drop(c);
    harness.wait_for_count(2).await;

    let notice = format!("[3] {c_addr} disconnected");
    assert_eq!(recv(&mut a).await, notice);
    assert_eq!(recv(&mut b).await, notice);
    assert_eq!(harness.server.connection_ids().unwrap(), ids(&[1, 2]));
    assert!(matches!(
        harness.server.peer_address(ConnectionId::new(3)),
        Err(ProtocolError::NotFound(_))
    ));

    let report = harness.server.broadcast("after", None).await.unwrap();
    assert_eq!(report.delivered, ids(&[1, 2]));

    harness.stop().await;
}

#[tokio::test]
async fn test_ids_not_reused_after_disconnect() {
    let harness = Harness::start(config(None)).await;
    let _a = harness.join().await;
    let b = harness.join().await;

    drop(b);
    harness.wait_for_count(1).await;

    let _c = harness.join().await;
    assert_eq!(harness.server.connection_ids().unwrap(), ids(&[1, 3]));

    harness.stop().await;
}

#[tokio::test]
async fn test_send_to_unknown_id() {
    let harness = Harness::start(config(None)).await;
    let mut a = harness.join().await;

    assert!(matches!(
        harness.server.send_to(ConnectionId::new(42), "hello").await,
        Err(ProtocolError::NotFound(id)) if id == ConnectionId::new(42)
    ));

    harness
        .server
        .send_to(ConnectionId::new(1), "direct")
        .await
        .unwrap();
    assert_eq!(recv(&mut a).await, "direct");

    harness.stop().await;
}

#[tokio::test]
async fn test_manual_accept_send_and_receive() {
    let config = config(Some(CipherSuite::X25519));
    let server = BroadcastServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();

    let (accepted, client) = tokio::join!(server.accept(), Client::connect_to(&addr, &config));
    let id = accepted.unwrap();
    let mut client = client.unwrap();
    assert!(client.is_encrypted());
    assert_eq!(server.peer_address(id).unwrap(), client.local_addr());

    client.send("ping").await.unwrap();
    assert_eq!(server.receive_from(id).await.unwrap(), "ping");

    server.send_to(id, "pong").await.unwrap();
    assert_eq!(recv(&mut client).await, "pong");

    client.close().await.unwrap();
    assert!(matches!(
        server.receive_from(id).await,
        Err(ProtocolError::ConnectionClosed)
    ));

    server.shutdown().await.unwrap();
    assert_eq!(server.connection_count().unwrap(), 0);
}

#[tokio::test]
async fn test_encrypted_chat_rsa() {
    let harness = Harness::start(config(Some(CipherSuite::Rsa))).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;
    assert!(a.is_encrypted());
    assert_eq!(a.capacity(), Some(117 - RELAY_OVERHEAD));

    a.send("secret hello").await.unwrap();
    assert_eq!(
        recv(&mut b).await,
        format!("[1] {}: secret hello", a.local_addr())
    );

    b.send("secret reply").await.unwrap();
    assert_eq!(
        recv(&mut a).await,
        format!("[2] {}: secret reply", b.local_addr())
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_encrypted_chat_x25519() {
    let harness = Harness::start(config(Some(CipherSuite::X25519))).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;
    assert_eq!(a.capacity(), None);

    let long = "x".repeat(10_000);
    a.send(&long).await.unwrap();
    assert_eq!(
        recv(&mut b).await,
        format!("[1] {}: {long}", a.local_addr())
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_rsa_capacity_enforced_before_sending() {
    let harness = Harness::start(config(Some(CipherSuite::Rsa))).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;
    let limit = a.capacity().unwrap();

    match a.send(&"y".repeat(limit + 1)).await {
        Err(ProtocolError::PayloadTooLarge { size, capacity }) => {
            assert_eq!(size, limit + 1);
            assert_eq!(capacity, limit);
        }
        other => panic!("Expected PayloadTooLarge, got {other:?}"),
    }

    // the stream was never touched, so the connection still works
    a.send("short").await.unwrap();
    assert_eq!(recv(&mut b).await, format!("[1] {}: short", a.local_addr()));

    harness.stop().await;
}

#[tokio::test]
async fn test_rsa_message_at_capacity_is_relayed() {
    let harness = Harness::start(config(Some(CipherSuite::Rsa))).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;

    let body = "z".repeat(a.capacity().unwrap());
    a.send(&body).await.unwrap();
    assert_eq!(recv(&mut b).await, format!("[1] {}: {body}", a.local_addr()));
    assert_silent(&mut a).await;
    assert_eq!(harness.server.metrics().snapshot().delivery_failures, 0);

    harness.stop().await;
}

#[tokio::test]
async fn test_sender_told_when_line_exceeds_recipient_key() {
    let mut wide = config(Some(CipherSuite::Rsa));
    wide.transport.buffer_size = 2048;
    let harness = Harness::start(wide).await;
    let mut a = harness.join().await;

    // b decrypts with a 1024-bit key, so the server can encrypt at most 117 bytes for it
    let narrow = config(Some(CipherSuite::Rsa));
    let mut b = Client::connect_to(&harness.addr, &narrow).await.unwrap();
    harness.wait_for_count(2).await;

    let body = "w".repeat(110);
    assert!(body.len() <= a.capacity().unwrap());
    a.send(&body).await.unwrap();

    assert_eq!(recv(&mut a).await, "message too large to relay to 1 client(s)");
    assert_silent(&mut b).await;
    assert_eq!(harness.server.metrics().snapshot().delivery_failures, 1);

    // both connections survive
    b.send("still here").await.unwrap();
    assert_eq!(recv(&mut a).await, format!("[2] {}: still here", b.local_addr()));

    harness.stop().await;
}

#[tokio::test]
async fn test_broadcast_reports_oversized_recipients() {
    let harness = Harness::start(config(Some(CipherSuite::Rsa))).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;

    let report = harness.server.broadcast(&"q".repeat(200), None).await.unwrap();
    assert!(report.delivered.is_empty());
    assert_eq!(report.failed, ids(&[1, 2]));
    assert_eq!(report.oversized, ids(&[1, 2]));

    let report = harness.server.broadcast("fits", None).await.unwrap();
    assert_eq!(report.delivered, ids(&[1, 2]));
    assert!(report.oversized.is_empty());
    assert_eq!(recv(&mut a).await, "fits");
    assert_eq!(recv(&mut b).await, "fits");

    harness.stop().await;
}

#[tokio::test]
async fn test_bind_resolves_hostname() {
    let mut config = config(None);
    config.server.address = "localhost:0".into();
    let server = BroadcastServer::bind(&config).await.unwrap();
    assert!(server.local_addr().unwrap().ip().is_loopback());
}

#[tokio::test]
async fn test_receive_from_resumes_after_timeout_mid_frame() {
    let mut config = config(None);
    config.server.idle_timeout = Duration::from_secs(1);
    let server = BroadcastServer::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();

    let (accepted, raw) = tokio::join!(server.accept(), TcpStream::connect(addr));
    let id = accepted.unwrap();
    let mut raw = raw.unwrap();

    let first = encode(b"hello", 50).unwrap();
    raw.write_all(&first[..30]).await.unwrap();
    assert!(matches!(
        server.receive_from(id).await,
        Err(ProtocolError::Timeout)
    ));
    assert_eq!(server.connection_ids().unwrap(), ids(&[1]));

    raw.write_all(&first[30..]).await.unwrap();
    raw.write_all(&encode(b"world", 50).unwrap()).await.unwrap();
    assert_eq!(server.receive_from(id).await.unwrap(), "hello");
    assert_eq!(server.receive_from(id).await.unwrap(), "world");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_failed_handshake_only_drops_that_socket() {
    let config = config(Some(CipherSuite::X25519));
    let harness = Harness::start(config.clone()).await;
    let header_width = config.transport.header_width;

    let mut rogue = TcpStream::connect(&harness.addr).await.unwrap();
    let mut server_key = vec![0u8; header_width + 32];
    rogue.read_exact(&mut server_key).await.unwrap();
    let junk = chatwire::core::frame::encode(b"not a key", header_width).unwrap();
    rogue.write_all(&junk).await.unwrap();

    tokio::time::timeout(WAIT, async {
        while harness.server.metrics().snapshot().handshakes_failed == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("Handshake failure should be recorded");
    assert_eq!(harness.server.connection_count().unwrap(), 0);

    let mut a = harness.join().await;
    let mut b = harness.join().await;
    a.send("still fine").await.unwrap();
    assert_eq!(
        recv(&mut b).await,
        format!("[1] {}: still fine", a.local_addr())
    );

    harness.stop().await;
}

#[tokio::test]
async fn test_idle_client_is_dropped() {
    let mut config = config(None);
    config.server.idle_timeout = Duration::from_secs(1);
    let harness = Harness::start(config).await;
    let mut a = harness.join().await;

    let result = tokio::time::timeout(WAIT, a.receive()).await.unwrap();
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    harness.wait_for_count(0).await;
    assert_eq!(harness.server.metrics().snapshot().connection_errors, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_connection_limit_rejects_extra_client() {
    let mut config = config(None);
    config.server.max_connections = 1;
    let harness = Harness::start(config).await;
    let _a = harness.join().await;

    let mut extra = Client::connect_to(&harness.addr, &harness.config)
        .await
        .unwrap();
    let result = tokio::time::timeout(WAIT, extra.receive()).await.unwrap();
    assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    assert_eq!(harness.server.connection_count().unwrap(), 1);
    assert_eq!(harness.server.metrics().snapshot().connections_rejected, 1);

    harness.stop().await;
}

#[tokio::test]
async fn test_shutdown_closes_clients() {
    let harness = Harness::start(config(None)).await;
    let mut a = harness.join().await;
    let mut b = harness.join().await;
    let server = harness.server.clone();

    harness.stop().await;

    assert_eq!(server.connection_count().unwrap(), 0);
    for client in [&mut a, &mut b] {
        let result = tokio::time::timeout(WAIT, client.receive()).await.unwrap();
        assert!(matches!(result, Err(ProtocolError::ConnectionClosed)));
    }
}

#[tokio::test]
async fn test_shutdown_token_stops_run_loop() {
    let harness = Harness::start(config(None)).await;
    let _a = harness.join().await;

    harness.server.shutdown_token().cancel();
    tokio::time::timeout(WAIT, harness.task)
        .await
        .expect("Run loop should observe the token")
        .unwrap()
        .unwrap();
    assert_eq!(harness.server.connection_count().unwrap(), 0);
}

#[tokio::test]
async fn test_split_client_reads_while_writing() {
    let harness = Harness::start(config(None)).await;
    let a = harness.join().await;
    let mut b = harness.join().await;
    let a_addr: SocketAddr = a.local_addr();

    let (mut sender, mut receiver) = a.into_split();
    let reader = tokio::spawn(async move {
        tokio::time::timeout(WAIT, receiver.receive()).await.unwrap()
    });

    sender.send("from a").await.unwrap();
    assert_eq!(recv(&mut b).await, format!("[1] {a_addr}: from a"));

    b.send("from b").await.unwrap();
    assert_eq!(
        reader.await.unwrap().unwrap(),
        format!("[2] {}: from b", b.local_addr())
    );

    harness.stop().await;
}
