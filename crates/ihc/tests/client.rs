//! Integration tests for the client lifecycle against a fake TCP server.

use std::time::Duration;

use ihc::prelude::*;
use ihc_protocol::Header;
use ihc_transport::TransportError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

// =========================================================================
// Fake server
// =========================================================================

async fn read_frame(stream: &mut TcpStream) -> (Header, Vec<u8>) {
    let header = stream.read_u8().await.expect("header byte");
    let len = stream.read_u16().await.expect("length");
    let mut payload = vec![0u8; usize::from(len)];
    stream.read_exact(&mut payload).await.expect("payload");
    (Header(header), payload)
}

async fn write_frame(stream: &mut TcpStream, header: Header, payload: &[u8]) {
    let mut frame = vec![header.0];
    frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    frame.extend_from_slice(payload);
    stream.write_all(&frame).await.expect("write frame");
}

/// Next frame from the client that is not a keepalive.
async fn next_request(stream: &mut TcpStream) -> (Header, Vec<u8>) {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(stream))
            .await
            .expect("a request should arrive in time");
        if frame.0 != Header::KEEPALIVE {
            return frame;
        }
    }
}

async fn accept_login(listener: &TcpListener, reply: &[u8]) -> TcpStream {
    let (mut stream, _) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
        .await
        .expect("client should connect in time")
        .unwrap();
    let (header, payload) = read_frame(&mut stream).await;
    assert_eq!(header, Header::LOGIN);
    assert_eq!(payload, b"admin:hash");
    write_frame(&mut stream, Header::LOGIN, reply).await;
    stream
}

async fn wait_for(
    rx: &mut broadcast::Receiver<Notification>,
    mut matches: impl FnMut(&Notification) -> bool,
) -> Notification {
    loop {
        let notification = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("notification in time")
            .expect("channel open");
        if matches(&notification) {
            return notification;
        }
    }
}

fn connected(notification: &Notification) -> bool {
    matches!(
        notification,
        Notification::ConnectivityChanged { connected: true, error: None }
    )
}

async fn tcp_config() -> (IhcConfig, TcpListener) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let config = IhcConfig {
        connection: ConnectionConfig {
            mode: TransportMode::Tcp,
            host: Some("127.0.0.1".into()),
            port: listener.local_addr().unwrap().port(),
            username: "admin".into(),
            password_hash: "hash".into(),
            ..Default::default()
        },
        session: SessionConfig::default(),
    };
    (config, listener)
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn test_requests_on_stopped_client_not_running() {
    let client = IhcClient::new(IhcConfig::default());

    assert!(matches!(
        client.request_users().await,
        Err(SessionError::NotRunning)
    ));
    assert!(matches!(
        client.send_command("d1", 1, None).await,
        Err(SessionError::NotRunning)
    ));
    assert_eq!(client.count_history(&HistoryFilter::default()).await, None);
    assert!(!client.is_connected().await);
    assert!(!client.is_administrator().await);
}

#[tokio::test]
async fn test_start_tcp_without_host_fails() {
    let client = IhcClient::new(IhcConfig {
        connection: ConnectionConfig {
            mode: TransportMode::Tcp,
            ..Default::default()
        },
        ..Default::default()
    });

    let result = client.start().await;
    assert!(matches!(
        result,
        Err(IhcError::Session(SessionError::Transport(
            TransportError::InvalidAddress(_)
        )))
    ));
    assert!(!client.is_running().await);
}

#[tokio::test]
async fn test_start_lists_users_and_stop_logs_off() {
    let (config, listener) = tcp_config().await;
    let client = IhcClient::new(config);
    let mut rx = client.subscribe();

    client.start().await.unwrap();
    let mut server = accept_login(&listener, b"OK*").await;
    wait_for(&mut rx, connected).await;
    assert!(client.is_administrator().await);

    client.request_users().await.unwrap();
    assert_eq!(next_request(&mut server).await, (Header::LIST_USERS, Vec::new()));
    write_frame(&mut server, Header::LIST_USERS, b"1*admin;2#guest").await;

    let users = wait_for(&mut rx, |n| matches!(n, Notification::UsersListed { .. })).await;
    let Notification::UsersListed { result } = users else {
        unreachable!()
    };
    assert_eq!(result.unwrap().len(), 2);

    client.stop().await;
    assert_eq!(next_request(&mut server).await, (Header::EXIT, Vec::new()));
    assert!(!client.is_running().await);
    assert!(matches!(
        client.request_users().await,
        Err(SessionError::NotRunning)
    ));
}

#[tokio::test]
async fn test_restart_opens_new_session() {
    let (config, listener) = tcp_config().await;
    let client = IhcClient::new(config);
    let mut rx = client.subscribe();

    client.start().await.unwrap();
    let mut first = accept_login(&listener, b"OK").await;
    wait_for(&mut rx, connected).await;
    assert!(!client.is_administrator().await);

    let restart = tokio::spawn(async move {
        client.restart().await.unwrap();
        client
    });

    assert_eq!(next_request(&mut first).await, (Header::EXIT, Vec::new()));
    let _second = accept_login(&listener, b"OK*").await;
    let client = restart.await.unwrap();

    // The subscription from before the restart keeps receiving.
    wait_for(&mut rx, connected).await;
    assert!(client.is_administrator().await);

    client.stop().await;
}

#[tokio::test]
async fn test_start_twice_keeps_running_session() {
    let (config, listener) = tcp_config().await;
    let client = IhcClient::new(config);

    client.start().await.unwrap();
    let _server = accept_login(&listener, b"OK").await;
    client.start().await.unwrap();

    // No second connection attempt.
    let second = tokio::time::timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(second.is_err());

    client.stop().await;
}

#[tokio::test]
async fn test_stop_sends_queued_command_before_logoff() {
    let (config, listener) = tcp_config().await;
    let client = IhcClient::new(config);
    let mut rx = client.subscribe();

    client.start().await.unwrap();
    let mut server = accept_login(&listener, b"OK").await;
    wait_for(&mut rx, connected).await;

    client.send_command("d1", 3, Some("75")).await.unwrap();
    client.stop().await;

    assert_eq!(
        next_request(&mut server).await,
        (Header::SEND_COMMAND, b"d1#3;75".to_vec())
    );
    assert_eq!(next_request(&mut server).await, (Header::EXIT, Vec::new()));
}
