//! Integration tests for the telemetry client.
//!
//! These tests start a WebSocket server that speaks the checker protocol and
//! let a real client connect to it, verifying the handshake, door reports and
//! the reconnect behaviour end to end.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

use checker_client::{
    ClientConfig, ClientError, ConnectionState, ReconnectPolicy, TelemetryClient,
    TelemetryHandle,
};
use checker_core::{
    CredentialStore, DeviceType, DoorState, MemoryCredentialStore, SharedDeviceState,
    StoredConfig, WifiCredentials,
};
use checker_protocol::{decode_frame, ClientFrame};

/// What the test server observed.
#[derive(Debug)]
enum ServerEvent {
    Frame(ClientFrame),
    Closed,
}

/// How the test server answers a welcome frame.
#[derive(Debug, Clone, Copy)]
enum AckMode {
    /// Echo the identity back (normal handshake).
    Echo,
    /// Answer with a fixed payload.
    Reply(&'static str),
}

struct TestServer {
    addr: SocketAddr,
    events: mpsc::UnboundedReceiver<ServerEvent>,
    kick: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Close the current device connection from the server side.
    fn drop_connection(&self) {
        self.kick.notify_one();
    }

    async fn next_event(&mut self) -> ServerEvent {
        timeout(Duration::from_secs(5), self.events.recv())
            .await
            .expect("Timed out waiting for server event")
            .expect("Server stopped")
    }

    async fn expect_welcome(&mut self) -> (DeviceType, u8, String) {
        match self.next_event().await {
            ServerEvent::Frame(ClientFrame::Welcome {
                device_type,
                battery,
                identity,
            }) => (device_type, battery, identity),
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    async fn expect_door_state(&mut self) -> (bool, u8, u32) {
        match self.next_event().await {
            ServerEvent::Frame(ClientFrame::DoorState {
                open,
                battery,
                elapsed_ms,
            }) => (open, battery, elapsed_ms),
            other => panic!("Expected door state, got {:?}", other),
        }
    }

    async fn expect_closed(&mut self) {
        match self.next_event().await {
            ServerEvent::Closed => {}
            other => panic!("Expected close, got {:?}", other),
        }
    }

    async fn expect_silence(&mut self, window: Duration) {
        if let Ok(event) = timeout(window, self.events.recv()).await {
            panic!("Expected no traffic, got {:?}", event);
        }
    }
}

async fn start_test_server(ack: AckMode) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    serve(listener, ack)
}

fn serve(listener: TcpListener, ack: AckMode) -> TestServer {
    let addr = listener.local_addr().unwrap();
    let (event_tx, events) = mpsc::unbounded_channel();
    let kick = Arc::new(Notify::new());

    let kick_clone = kick.clone();
    let handle = tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let event_tx = event_tx.clone();
            let kick = kick_clone.clone();
            tokio::spawn(handle_device(stream, ack, event_tx, kick));
        }
    });

    TestServer {
        addr,
        events,
        kick,
        handle,
    }
}

async fn handle_device(
    stream: TcpStream,
    ack: AckMode,
    events: mpsc::UnboundedSender<ServerEvent>,
    kick: Arc<Notify>,
) {
    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    let (mut ws_tx, mut ws_rx) = ws.split();

    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Binary(bytes))) => {
                    let frame = decode_frame(&bytes).expect("Device sent a malformed frame");
                    if let ClientFrame::Welcome { identity, .. } = &frame {
                        let reply = match ack {
                            AckMode::Echo => identity.clone(),
                            AckMode::Reply(text) => text.to_string(),
                        };
                        let _ = ws_tx.send(Message::Text(reply)).await;
                    }
                    let _ = events.send(ServerEvent::Frame(frame));
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => {
                    let _ = events.send(ServerEvent::Closed);
                    return;
                }
                Some(Ok(_)) => {}
            },
            _ = kick.notified() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                let _ = events.send(ServerEvent::Closed);
                return;
            }
        }
    }
}

/// Server that acknowledges each handshake and then never reads from the
/// connection again. Pings go unanswered and writes eventually back up.
async fn start_stalled_server(recv_buffer: Option<u32>) -> TestServer {
    let socket = TcpSocket::new_v4().unwrap();
    if let Some(size) = recv_buffer {
        socket.set_recv_buffer_size(size).unwrap();
    }
    socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let listener = socket.listen(16).unwrap();
    let addr = listener.local_addr().unwrap();
    let (event_tx, events) = mpsc::unbounded_channel();

    let handle = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                continue;
            };
            if let Some(Ok(Message::Binary(bytes))) = ws.next().await {
                let frame = decode_frame(&bytes).expect("Device sent a malformed frame");
                if let ClientFrame::Welcome { identity, .. } = &frame {
                    let _ = ws.send(Message::Text(identity.clone())).await;
                }
                let _ = event_tx.send(ServerEvent::Frame(frame));
            }
            // Keep the connection open without reading from it
            held.push(ws);
        }
    });

    TestServer {
        addr,
        events,
        kick: Arc::new(Notify::new()),
        handle,
    }
}

fn test_config() -> ClientConfig {
    ClientConfig {
        reconnect: ReconnectPolicy::fixed(Duration::from_millis(50)),
        connect_timeout: Duration::from_secs(2),
        ack_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

fn test_store(addr: SocketAddr, provisioned: bool) -> Arc<MemoryCredentialStore> {
    Arc::new(MemoryCredentialStore::with_config(StoredConfig {
        device_id: Some("door-42".to_string()),
        wifi: provisioned.then(|| WifiCredentials::new("home", "correct-horse")),
        server_url: Some(format!("ws://{}/ws", addr)),
    }))
}

fn start_client(
    config: ClientConfig,
    store: Arc<MemoryCredentialStore>,
    device: Arc<SharedDeviceState>,
) -> (TelemetryHandle, JoinHandle<()>) {
    TelemetryClient::new(config, store, device)
        .expect("Client should start")
        .spawn()
}

async fn wait_for(handle: &TelemetryHandle, state: ConnectionState) {
    timeout(Duration::from_secs(5), handle.wait_for_state(state))
        .await
        .unwrap_or_else(|_| panic!("Timed out waiting for {}", state))
        .expect("Client stopped");
}

#[tokio::test]
async fn test_handshake_sends_welcome_then_door_state() {
    let mut server = start_test_server(AckMode::Echo).await;
    let device = Arc::new(SharedDeviceState::new(false, 60));
    let (handle, task) = start_client(test_config(), test_store(server.addr, true), device);

    let (device_type, battery, identity) = server.expect_welcome().await;
    assert_eq!(device_type, DeviceType::Checker);
    assert_eq!(battery, 9);
    assert_eq!(identity, "door-42");

    // The current state follows the handshake without being asked for
    let (open, battery, _) = server.expect_door_state().await;
    assert!(!open);
    assert_eq!(battery, 9);

    wait_for(&handle, ConnectionState::Active).await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_door_change_reported_while_active() {
    let mut server = start_test_server(AckMode::Echo).await;
    let device = Arc::new(SharedDeviceState::new(false, 100));
    let (handle, task) = start_client(test_config(), test_store(server.addr, true), device.clone());

    server.expect_welcome().await;
    server.expect_door_state().await;
    wait_for(&handle, ConnectionState::Active).await;

    let opened = device.set_open(true).expect("door transition");
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.report_door_change(opened);

    let (open, battery, elapsed_ms) = server.expect_door_state().await;
    assert!(open);
    assert_eq!(battery, 15);
    assert!(elapsed_ms >= 20, "elapsed {} should cover the delay", elapsed_ms);
    assert!(elapsed_ms < 5_000);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_mismatched_ack_keeps_connection_pending() {
    let mut server = start_test_server(AckMode::Reply("door-99")).await;
    let device = Arc::new(SharedDeviceState::new(false, 60));
    let (handle, task) = start_client(test_config(), test_store(server.addr, true), device.clone());

    server.expect_welcome().await;
    wait_for(&handle, ConnectionState::AwaitingAck).await;

    // Not active, so door changes go nowhere
    let opened = device.set_open(true).expect("door transition");
    handle.report_door_change(opened);

    server.expect_silence(Duration::from_millis(300)).await;
    assert_eq!(handle.state(), ConnectionState::AwaitingAck);

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_ack_timeout_reconnects() {
    let mut server = start_test_server(AckMode::Reply("door-99")).await;
    let device = Arc::new(SharedDeviceState::new(false, 60));
    let config = ClientConfig {
        ack_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let (handle, task) = start_client(config, test_store(server.addr, true), device);

    server.expect_welcome().await;
    // Handshake window expires, the client hangs up and tries again
    server.expect_closed().await;
    server.expect_welcome().await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_reconnects_after_server_drops_connection() {
    let mut server = start_test_server(AckMode::Echo).await;
    let device = Arc::new(SharedDeviceState::new(true, 60));
    let (handle, task) = start_client(test_config(), test_store(server.addr, true), device);

    server.expect_welcome().await;
    server.expect_door_state().await;
    wait_for(&handle, ConnectionState::Active).await;

    server.drop_connection();
    server.expect_closed().await;

    // A fresh handshake, including the current door state, without intervention
    let (_, _, identity) = server.expect_welcome().await;
    assert_eq!(identity, "door-42");
    let (open, _, _) = server.expect_door_state().await;
    assert!(open);
    wait_for(&handle, ConnectionState::Active).await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_unanswered_ping_reconnects() {
    let mut server = start_stalled_server(None).await;
    let device = Arc::new(SharedDeviceState::new(false, 60));
    let config = ClientConfig {
        ping_interval: Duration::from_millis(100),
        pong_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let (handle, task) = start_client(config, test_store(server.addr, true), device);

    server.expect_welcome().await;
    wait_for(&handle, ConnectionState::Active).await;

    // The link looks dead, so the client hangs up and handshakes again
    let (_, _, identity) = server.expect_welcome().await;
    assert_eq!(identity, "door-42");

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_stalled_write_reconnects() {
    let mut server = start_stalled_server(Some(4096)).await;
    let device = Arc::new(SharedDeviceState::new(false, 60));
    let config = ClientConfig {
        send_timeout: Duration::from_millis(200),
        ..test_config()
    };
    let (handle, task) = start_client(config, test_store(server.addr, true), device);

    server.expect_welcome().await;
    wait_for(&handle, ConnectionState::Active).await;

    // Keep reporting until the socket buffers fill and a write times out
    let flood = async {
        let mut open = false;
        while handle.state() == ConnectionState::Active {
            open = !open;
            handle.report_door_change(DoorState::new(open, Instant::now()));
            tokio::task::yield_now().await;
        }
    };
    timeout(Duration::from_secs(20), flood)
        .await
        .expect("A write should stall once the peer stops reading");

    let (_, _, identity) = server.expect_welcome().await;
    assert_eq!(identity, "door-42");

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_retries_until_server_available() {
    // Reserve a port, then leave it closed for a while
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let device = Arc::new(SharedDeviceState::new(false, 60));
    let (handle, task) = start_client(test_config(), test_store(addr, true), device);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_ne!(handle.state(), ConnectionState::Active);
    assert_ne!(handle.state(), ConnectionState::Unprovisioned);

    let listener = TcpListener::bind(addr).await.unwrap();
    let mut server = serve(listener, AckMode::Echo);

    server.expect_welcome().await;
    wait_for(&handle, ConnectionState::Active).await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_unprovisioned_waits_for_credentials() {
    let mut server = start_test_server(AckMode::Echo).await;
    let store = test_store(server.addr, false);
    let device = Arc::new(SharedDeviceState::new(false, 60));
    let (handle, task) = start_client(test_config(), store.clone(), device);

    assert_eq!(handle.state(), ConnectionState::Unprovisioned);
    server.expect_silence(Duration::from_millis(200)).await;

    // A password of seven characters is not enough
    store
        .set_credentials(&WifiCredentials::new("home", "1234567"))
        .unwrap();
    handle.provisioned().await.unwrap();
    server.expect_silence(Duration::from_millis(200)).await;
    assert_eq!(handle.state(), ConnectionState::Unprovisioned);

    store
        .set_credentials(&WifiCredentials::new("home", "12345678"))
        .unwrap();
    handle.provisioned().await.unwrap();

    server.expect_welcome().await;
    wait_for(&handle, ConnectionState::Active).await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_factory_reset_stops_transport() {
    let mut server = start_test_server(AckMode::Echo).await;
    let store = test_store(server.addr, true);
    let device = Arc::new(SharedDeviceState::new(false, 60));
    let (handle, task) = start_client(test_config(), store.clone(), device);

    server.expect_welcome().await;
    server.expect_door_state().await;
    wait_for(&handle, ConnectionState::Active).await;

    handle.factory_reset().await.unwrap();
    assert_eq!(handle.state(), ConnectionState::Unprovisioned);
    assert_eq!(store.credentials().unwrap(), None);
    server.expect_closed().await;

    // No automatic reconnect without new credentials
    server.expect_silence(Duration::from_millis(200)).await;

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    server.handle.abort();
}

#[tokio::test]
async fn test_shutdown_closes_connection() {
    let mut server = start_test_server(AckMode::Echo).await;
    let device = Arc::new(SharedDeviceState::new(false, 60));
    let (handle, task) = start_client(test_config(), test_store(server.addr, true), device);

    server.expect_welcome().await;
    server.expect_door_state().await;
    wait_for(&handle, ConnectionState::Active).await;

    handle.shutdown().await.unwrap();
    server.expect_closed().await;
    timeout(Duration::from_secs(1), task)
        .await
        .expect("Client task should exit")
        .unwrap();

    assert!(matches!(handle.shutdown().await, Err(ClientError::Stopped)));
    server.handle.abort();
}

#[tokio::test]
async fn test_empty_identity_is_fatal() {
    let device = Arc::new(SharedDeviceState::new(false, 60));

    let store = Arc::new(MemoryCredentialStore::new());
    let result = TelemetryClient::new(test_config(), store, device.clone());
    assert!(matches!(result, Err(ClientError::Identity(_))));

    let store = Arc::new(MemoryCredentialStore::with_config(StoredConfig {
        device_id: Some(String::new()),
        ..Default::default()
    }));
    let result = TelemetryClient::new(test_config(), store, device);
    assert!(matches!(result, Err(ClientError::Identity(_))));
}
