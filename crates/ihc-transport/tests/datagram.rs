//! Integration tests for the datagram transport.
//!
//! A fake server socket on `127.0.0.1:0` hands out a session token and
//! checks the prefixing, fragmentation and invalid-session handling. The
//! broadcast and multicast tests cover socket setup and echo filtering.

mod common;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use common::RecordingEvents;
use ihc_protocol::{Header, Packet};
use ihc_transport::datagram::{BUFFER_SIZE, MAX_FRAGMENT_PAYLOAD};
use ihc_transport::{
    ConnectionConfig, DatagramTransport, SendFlags, Transport, TransportError,
    TransportMode, TransportTimings,
};
use tokio::net::UdpSocket;

async fn recv(server: &UdpSocket) -> (Vec<u8>, SocketAddr) {
    let mut buf = vec![0u8; BUFFER_SIZE];
    let (len, from) = tokio::time::timeout(Duration::from_secs(5), server.recv_from(&mut buf))
        .await
        .expect("datagram in time")
        .unwrap();
    buf.truncate(len);
    (buf, from)
}

/// Asserts the next datagram is an unprefixed LOGIN and returns its sender.
async fn expect_login(server: &UdpSocket) -> SocketAddr {
    let (login, client) = recv(server).await;
    assert_eq!(login[0], Header::LOGIN.0);
    assert_eq!(login[1], SendFlags::WITHOUT_SESSION.bits());
    assert_eq!(&login[2..], b"admin:hash");
    client
}

async fn reply_login(server: &UdpSocket, client: SocketAddr, token: &[u8]) {
    let mut reply = vec![Header::LOGIN.0, 0];
    reply.extend_from_slice(token);
    server.send_to(&reply, client).await.unwrap();
}

fn config(mode: TransportMode, port: u16, timings: TransportTimings) -> ConnectionConfig {
    ConnectionConfig {
        mode,
        host: Some("127.0.0.1".into()),
        port,
        local_port: Some(0),
        username: "admin".into(),
        password_hash: "hash".into(),
        timings,
        ..Default::default()
    }
}

fn spawn_run(transport: &Arc<DatagramTransport>) -> Arc<RecordingEvents> {
    let events = Arc::new(RecordingEvents::new());
    let runner = Arc::clone(transport);
    let runner_events = Arc::clone(&events);
    tokio::spawn(async move { runner.run(runner_events).await });
    events
}

/// Starts a unicast transport against a fake server and completes the
/// login with token `tok` (administrator).
async fn start_with(
    timings: TransportTimings,
) -> (
    Arc<DatagramTransport>,
    Arc<RecordingEvents>,
    UdpSocket,
    SocketAddr,
) {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();

    let transport = Arc::new(DatagramTransport::new(config(
        TransportMode::Udp,
        port,
        timings,
    )));
    transport.initialize().await.expect("initialize");
    let events = spawn_run(&transport);

    let client = expect_login(&server).await;
    reply_login(&server, client, b"tok*").await;

    events.wait_connected(true).await;
    (transport, events, server, client)
}

async fn start() -> (
    Arc<DatagramTransport>,
    Arc<RecordingEvents>,
    UdpSocket,
    SocketAddr,
) {
    start_with(TransportTimings {
        invalid_session_retry_ms: 60_000,
        ..Default::default()
    })
    .await
}

#[tokio::test]
async fn test_login_reply_establishes_session() {
    let (transport, _events, _server, _client) = start().await;
    assert!(transport.has_session());
    assert!(transport.is_administrator());
    transport.shutdown();
}

#[tokio::test]
async fn test_send_prefixes_session_token() {
    let (transport, _events, server, _client) = start().await;

    transport
        .send(Header::LIST_USERS, b"", SendFlags::NONE)
        .await
        .unwrap();

    let (datagram, _) = recv(&server).await;
    assert_eq!(datagram, [Header::LIST_USERS.0, 0, b't', b'o', b'k']);
    transport.shutdown();
}

#[tokio::test]
async fn test_send_large_payload_fragments() {
    let (transport, _events, server, _client) = start().await;
    // Token (3 bytes) plus payload overflows one datagram by 10 bytes.
    let payload = vec![b'x'; MAX_FRAGMENT_PAYLOAD + 10 - 3];

    transport
        .send(Header::SEND_COMMAND, &payload, SendFlags::NONE)
        .await
        .unwrap();

    let (first, _) = recv(&server).await;
    let (second, _) = recv(&server).await;
    assert_eq!(first.len(), BUFFER_SIZE);
    assert_eq!(first[1], SendFlags::MORE_FOLLOWS.bits());
    assert_eq!(second[1], 0);

    let mut joined = first[2..].to_vec();
    joined.extend_from_slice(&second[2..]);
    assert_eq!(&joined[..3], b"tok");
    assert_eq!(&joined[3..], payload.as_slice());
    transport.shutdown();
}

#[tokio::test]
async fn test_fragmented_reply_reassembled_for_poll() {
    let (transport, _events, server, client) = start().await;

    let mut first = vec![Header::LIST_USERS.0, SendFlags::MORE_FOLLOWS.bits()];
    first.extend_from_slice(b"1*admin;");
    let mut second = vec![Header::LIST_USERS.0, 0];
    second.extend_from_slice(b"2#guest");
    server.send_to(&first, client).await.unwrap();
    server.send_to(&second, client).await.unwrap();

    let reply = transport.poll(Header::LIST_USERS, Duration::from_secs(5)).await;
    assert_eq!(
        reply,
        Some(Packet::new(Header::LIST_USERS, "1*admin;2#guest"))
    );
    transport.shutdown();
}

#[tokio::test]
async fn test_async_header_dispatched_not_queued() {
    let (transport, events, server, client) = start().await;
    let mut pushed = events.pushed();

    server
        .send_to(&[Header::USERS_CHANGED.0, 0], client)
        .await
        .unwrap();

    let packet = tokio::time::timeout(Duration::from_secs(5), pushed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(packet.header, Header::USERS_CHANGED);
    assert!(packet.payload.is_empty());
    transport.shutdown();
}

#[tokio::test]
async fn test_invalid_session_clears_token_and_rejects_sends() {
    let (transport, events, server, client) = start().await;

    server
        .send_to(&[Header::INVALID_SESSION.0, 0], client)
        .await
        .unwrap();
    events.wait_connected(false).await;

    assert!(!transport.has_session());
    assert!(!transport.is_administrator());
    let result = transport.send(Header::KEEPALIVE, b"", SendFlags::NONE).await;
    assert!(matches!(result, Err(TransportError::NoSession)));

    // Login itself is still allowed.
    transport
        .send(Header::LOGIN, b"admin:hash", SendFlags::WITHOUT_SESSION)
        .await
        .unwrap();
    transport.shutdown();
}

#[tokio::test]
async fn test_invalid_session_logs_in_again_after_retry_interval() {
    let (transport, events, server, client) = start_with(TransportTimings {
        invalid_session_retry_ms: 200,
        ..Default::default()
    })
    .await;

    server
        .send_to(&[Header::INVALID_SESSION.0, 0], client)
        .await
        .unwrap();
    events.wait_connected(false).await;
    let lost = tokio::time::Instant::now();

    let again = expect_login(&server).await;
    assert!(lost.elapsed() >= Duration::from_millis(150));
    reply_login(&server, again, b"tok2").await;
    events.wait_connected(true).await;
    assert!(!transport.is_administrator());

    transport
        .send(Header::LIST_USERS, b"", SendFlags::NONE)
        .await
        .unwrap();
    let (datagram, _) = recv(&server).await;
    assert_eq!(datagram, [Header::LIST_USERS.0, 0, b't', b'o', b'k', b'2']);
    transport.shutdown();
}

// -- Broadcast and multicast ---------------------------------------------------

#[tokio::test]
async fn test_broadcast_drops_own_datagrams_and_skips_next_login() {
    let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let port = server.local_addr().unwrap().port();
    let transport = Arc::new(DatagramTransport::new(config(
        TransportMode::Broadcast,
        port,
        TransportTimings {
            datagram_receive_timeout_ms: 600,
            ..Default::default()
        },
    )));
    transport.initialize().await.expect("initialize");
    let _events = spawn_run(&transport);

    // Loopback counts as this host, so the reply looks like an echo.
    let client = expect_login(&server).await;
    reply_login(&server, client, b"tok*").await;

    // No login right after the echo; the next one waits for the receive
    // timeout.
    let mut buf = vec![0u8; BUFFER_SIZE];
    let early = tokio::time::timeout(Duration::from_millis(300), server.recv_from(&mut buf)).await;
    assert!(early.is_err());
    assert!(!transport.has_session());

    expect_login(&server).await;
    assert!(!transport.has_session());
    transport.shutdown();
}

#[tokio::test]
async fn test_broadcast_transports_share_local_port() {
    let first = DatagramTransport::new(config(
        TransportMode::Broadcast,
        9,
        TransportTimings::default(),
    ));
    first.initialize().await.expect("first initialize");
    let port = first.local_addr().unwrap().port();

    let second = DatagramTransport::new(ConnectionConfig {
        local_port: Some(port),
        ..config(TransportMode::Broadcast, 9, TransportTimings::default())
    });
    second.initialize().await.expect("second binds the same port");
    assert_eq!(second.local_addr().unwrap().port(), port);

    first.shutdown();
    second.shutdown();
}

#[tokio::test]
async fn test_multicast_requires_group_address() {
    let transport = DatagramTransport::new(config(
        TransportMode::Multicast,
        9,
        TransportTimings::default(),
    ));
    let result = transport.initialize().await;
    assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    assert!(transport.local_addr().is_none());
}
