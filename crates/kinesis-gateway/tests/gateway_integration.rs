//! Integration tests for the realtime gateway.
//!
//! # Purpose
//!
//! These tests bind a real [`GatewayServer`] on an ephemeral loopback port and
//! drive it with a `tokio-tungstenite` WebSocket client, exactly as a browser
//! would.  The device side is replaced by a recording control session factory,
//! so every command the gateway issues can be checked.
//!
//! They verify:
//!
//! - Admission: a connecting client is greeted with a `welcome` event.
//! - Routing: location and clear events reach that client's own session.
//! - Rejection: malformed events get an `error` reply and the socket stays up.
//! - Release: a disconnecting client's session is cleared and closed.
//! - Refusal: a failed handshake closes the socket with a reason.
//! - Shutdown: stopping the server releases every open session.
//! - Static UI: the three assets are served with permissive CORS.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use kinesis_core::{ControlError, ControlSession, ControlSessionFactory, RsdAddress};
use kinesis_gateway::application::SessionRegistry;
use kinesis_gateway::domain::GatewayConfig;
use kinesis_gateway::infrastructure::GatewayServer;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Records every device command as `"<session> <command>"`.
#[derive(Default)]
struct RecordingFactory {
    calls: Arc<Mutex<Vec<String>>>,
    sessions: Mutex<usize>,
    fail_connect: bool,
}

#[async_trait]
impl ControlSessionFactory for RecordingFactory {
    async fn connect(&self, _rsd: &RsdAddress) -> Result<Box<dyn ControlSession>, ControlError> {
        if self.fail_connect {
            return Err(ControlError::Timeout(Duration::from_secs(10)));
        }
        let id = {
            let mut n = self.sessions.lock().unwrap();
            *n += 1;
            *n
        };
        Ok(Box::new(RecordingSession {
            id,
            calls: Arc::clone(&self.calls),
        }))
    }
}

struct RecordingSession {
    id: usize,
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingSession {
    fn record(&self, what: String) {
        self.calls.lock().unwrap().push(format!("{} {what}", self.id));
    }
}

#[async_trait]
impl ControlSession for RecordingSession {
    async fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<(), ControlError> {
        self.record(format!("set {latitude},{longitude}"));
        Ok(())
    }

    async fn clear_location(&mut self) -> Result<(), ControlError> {
        self.record("clear".to_string());
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ControlError> {
        self.record("close".to_string());
        Ok(())
    }
}

// ── Harness ───────────────────────────────────────────────────────────────────

struct RunningGateway {
    addr: SocketAddr,
    registry: Arc<SessionRegistry>,
    calls: Arc<Mutex<Vec<String>>>,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl RunningGateway {
    async fn start(factory: RecordingFactory) -> Self {
        let calls = Arc::clone(&factory.calls);
        let config = GatewayConfig::new(RsdAddress::new("fd7b::1", 58783));
        let server = GatewayServer::bind(&config, Arc::new(factory))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let registry = server.registry();

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.serve(async move {
            let _ = stopped.await;
        }));

        Self {
            addr,
            registry,
            calls,
            stop: Some(stop),
            task,
        }
    }

    async fn connect(&self) -> Client {
        let (ws, _response) = connect_async(format!("ws://{}/ws", self.addr))
            .await
            .unwrap();
        ws
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Waits until the registry has no entries left.
    async fn wait_until_empty(&self) {
        tokio::time::timeout(WAIT, async {
            while !self.registry.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("registry should drain");
    }

    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("gateway should stop")
            .unwrap()
            .unwrap();
    }
}

/// Reads frames until the next text frame and parses it as JSON.
async fn next_event(ws: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for an event")
            .expect("socket ended")
            .expect("socket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn send(ws: &mut Client, event: Value) {
    ws.send(Message::Text(event.to_string())).await.unwrap();
}

/// Plain HTTP/1.1 GET; returns the raw response text.
async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {addr}\r\nOrigin: http://example.test\r\nConnection: close\r\n\r\n"
    );
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

// ── Session lifecycle tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_client_is_welcomed_and_location_is_applied() {
    // Arrange
    let gateway = RunningGateway::start(RecordingFactory::default()).await;
    let mut ws = gateway.connect().await;

    // Act
    let welcome = next_event(&mut ws).await;
    send(&mut ws, json!({"type": "location", "data": "37.3349,-122.0090"})).await;
    let reply = next_event(&mut ws).await;

    // Assert
    assert_eq!(welcome["type"], "welcome");
    assert!(welcome["client_id"].as_str().is_some_and(|id| !id.is_empty()));
    assert_eq!(reply, json!({"type": "ack", "event": "location"}));
    assert_eq!(gateway.calls(), vec!["1 set 37.3349,-122.009"]);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_malformed_location_is_rejected_and_socket_stays_open() {
    let gateway = RunningGateway::start(RecordingFactory::default()).await;
    let mut ws = gateway.connect().await;
    next_event(&mut ws).await;

    send(&mut ws, json!({"type": "location", "data": "abc"})).await;
    let rejected = next_event(&mut ws).await;
    send(&mut ws, json!({"type": "clear"})).await;
    let cleared = next_event(&mut ws).await;

    assert_eq!(rejected["type"], "error");
    assert_eq!(rejected["kind"], "malformed_location");
    assert_eq!(cleared, json!({"type": "ack", "event": "clear"}));
    assert_eq!(gateway.calls(), vec!["1 clear"]);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_unknown_event_type_is_malformed_event() {
    let gateway = RunningGateway::start(RecordingFactory::default()).await;
    let mut ws = gateway.connect().await;
    next_event(&mut ws).await;

    send(&mut ws, json!({"type": "teleport"})).await;
    let reply = next_event(&mut ws).await;

    assert_eq!(reply["kind"], "malformed_event");
    assert!(gateway.calls().is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_clears_and_releases_session() {
    // Arrange: one client with a simulated location
    let gateway = RunningGateway::start(RecordingFactory::default()).await;
    let mut ws = gateway.connect().await;
    next_event(&mut ws).await;
    send(&mut ws, json!({"type": "location", "data": "1.5,2.5"})).await;
    next_event(&mut ws).await;

    // Act: the browser tab goes away
    ws.close(None).await.unwrap();
    drop(ws);
    gateway.wait_until_empty().await;

    // Assert: clear happens before close, exactly once each
    assert_eq!(gateway.calls(), vec!["1 set 1.5,2.5", "1 clear", "1 close"]);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_two_clients_drive_independent_sessions() {
    let gateway = RunningGateway::start(RecordingFactory::default()).await;
    let mut first = gateway.connect().await;
    next_event(&mut first).await;
    let mut second = gateway.connect().await;
    next_event(&mut second).await;

    send(&mut second, json!({"type": "location", "data": "10,20"})).await;
    next_event(&mut second).await;
    send(&mut first, json!({"type": "clear"})).await;
    next_event(&mut first).await;

    assert_eq!(gateway.calls(), vec!["2 set 10,20", "1 clear"]);
    assert_eq!(gateway.registry.len(), 2);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_failed_handshake_closes_socket_with_reason() {
    // Arrange: the device is unreachable
    let gateway = RunningGateway::start(RecordingFactory {
        fail_connect: true,
        ..RecordingFactory::default()
    })
    .await;
    let mut ws = gateway.connect().await;

    // Act
    let frame = tokio::time::timeout(WAIT, ws.next())
        .await
        .expect("timed out waiting for close")
        .expect("socket ended without a close frame")
        .unwrap();

    // Assert: no welcome, a close frame with the handshake error instead
    match frame {
        Message::Close(Some(close)) => {
            assert!(close.reason.contains("could not open a control session"));
        }
        other => panic!("expected a close frame, got {other:?}"),
    }
    assert!(gateway.registry.is_empty());

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_releases_every_open_session() {
    // Arrange: two clients still connected
    let gateway = RunningGateway::start(RecordingFactory::default()).await;
    let mut first = gateway.connect().await;
    next_event(&mut first).await;
    let mut second = gateway.connect().await;
    next_event(&mut second).await;
    let calls = Arc::clone(&gateway.calls);
    let registry = Arc::clone(&gateway.registry);

    // Act
    gateway.shutdown().await;

    // Assert
    assert!(registry.is_empty());
    let calls = calls.lock().unwrap().clone();
    for id in ["1", "2"] {
        assert!(calls.contains(&format!("{id} clear")));
        assert!(calls.contains(&format!("{id} close")));
    }
}

// ── Static UI tests ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_static_assets_are_served() {
    let gateway = RunningGateway::start(RecordingFactory::default()).await;

    let index = http_get(gateway.addr, "/").await;
    let script = http_get(gateway.addr, "/index.js").await;
    let style = http_get(gateway.addr, "/main.css").await;

    assert!(index.starts_with("HTTP/1.1 200"));
    assert!(index.contains("<title>Kinesis</title>"));
    assert!(script.to_ascii_lowercase().contains("content-type: text/javascript"));
    assert!(style.to_ascii_lowercase().contains("content-type: text/css"));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_cross_origin_requests_are_allowed() {
    let gateway = RunningGateway::start(RecordingFactory::default()).await;

    let response = http_get(gateway.addr, "/index.js").await;

    assert!(response
        .to_ascii_lowercase()
        .contains("access-control-allow-origin: *"));

    gateway.shutdown().await;
}
