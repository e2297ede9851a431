//! HTTP + WebSocket server: static UI, per-client tasks, graceful shutdown.
//!
//! This module is responsible for:
//!
//! 1. Binding a TCP listener (loopback, ephemeral port by default) and
//!    reporting the port the OS picked.
//! 2. Serving the three static UI assets (`/`, `/index.js`, `/main.css`).
//! 3. Upgrading `/ws` requests to WebSocket sessions.  Each session runs in
//!    its own Tokio task and:
//!    - opens a device control session (`on_connect`),
//!    - answers every text frame with one reply event (`on_message`),
//!    - releases the control session when the socket goes away
//!      (`on_disconnect`).
//! 4. Stopping when the shutdown future resolves: open sockets get a close
//!    frame, and every remaining control session is cleared and closed
//!    before [`GatewayServer::serve`] returns.
//!
//! # Scalability
//!
//! axum spawns one task per connection and another per upgraded WebSocket,
//! so a slow device command for one client never delays another client.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use kinesis_core::ControlSessionFactory;

use crate::application::{Gateway, SessionEvents, SessionRegistry};
use crate::domain::{ClientId, ErrorKind, GatewayConfig, ServerEvent};
use crate::infrastructure::assets;

/// Close-frame reasons must fit in a control frame (125 bytes minus the code).
const MAX_CLOSE_REASON: usize = 120;

/// Shared state handed to every request handler.
#[derive(Clone)]
struct AppState {
    events: Arc<dyn SessionEvents>,
    /// Flips to `true` when the server begins shutting down.
    stopping: watch::Receiver<bool>,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Builds the gateway's HTTP routes.
///
/// Open WebSocket sessions close once `stopping` holds `true` or its sender
/// is dropped, so callers must keep the sender alive while serving.
pub fn router(events: Arc<dyn SessionEvents>, stopping: watch::Receiver<bool>) -> Router {
    // The UI is loaded from a file:// page or another loopback port during
    // development, so any origin may call in.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(assets::index_html))
        .route("/index.js", get(assets::index_js))
        .route("/main.css", get(assets::main_css))
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(AppState { events, stopping })
}

/// A bound, not-yet-serving gateway.
///
/// Binding and serving are separate steps so `main` can print the chosen port
/// before the first client can connect.
pub struct GatewayServer {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
}

impl GatewayServer {
    /// Binds the listener on `config.bind_addr`.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound (e.g., the port is
    /// already in use).
    pub async fn bind(
        config: &GatewayConfig,
        factory: Arc<dyn ControlSessionFactory>,
    ) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("failed to bind gateway listener on {}", config.bind_addr))?;

        let registry = Arc::new(SessionRegistry::new(config.rsd.clone(), factory));
        Ok(Self { listener, registry })
    }

    /// The address actually bound.  Its port is the one to hand to the UI.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read gateway listener address")
    }

    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Serves until `shutdown` resolves, then closes every control session.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.  Sessions are closed either
    /// way.
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = self.local_addr()?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let events: Arc<dyn SessionEvents> = Arc::new(Gateway::new(Arc::clone(&self.registry)));
        let app = router(events, stop_rx);

        info!("gateway listening on http://{addr}");
        let served = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move {
                shutdown.await;
                let _ = stop_tx.send(true);
            })
            .await
            .context("gateway server failed");

        self.registry.close_all().await;
        info!("gateway stopped");
        served
    }
}

// ── Per-client handler ────────────────────────────────────────────────────────

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_client(socket, state))
}

/// Runs the complete lifecycle of one UI client.
async fn handle_client(mut socket: WebSocket, state: AppState) {
    let client = ClientId::generate();
    let AppState {
        events,
        mut stopping,
    } = state;

    // ── Step 1: Open the control session ──────────────────────────────────────
    //
    // A refused handshake is reported in the close frame; the browser never
    // sees a welcome event.
    if let Err(e) = events.on_connect(&client).await {
        warn!("refusing client {client}: {e}");
        let frame = CloseFrame {
            code: close_code::ERROR,
            reason: close_reason(&e.to_string()).into(),
        };
        let _ = socket.send(Message::Close(Some(frame))).await;
        return;
    }
    info!("client {client} connected");

    // ── Step 2: Greet, then answer frames until the socket closes ─────────────
    let welcome = ServerEvent::Welcome {
        client_id: client.to_string(),
    };
    if send_event(&mut socket, &welcome).await {
        loop {
            tokio::select! {
                frame = socket.recv() => {
                    let keep_going = match frame {
                        Some(Ok(Message::Text(text))) => {
                            let reply = events.on_message(&client, text.as_str()).await;
                            send_event(&mut socket, &reply).await
                        }
                        Some(Ok(Message::Binary(_))) => {
                            let reply = ServerEvent::error(
                                ErrorKind::MalformedEvent,
                                "binary frames are not supported",
                            );
                            send_event(&mut socket, &reply).await
                        }
                        // axum answers pings itself.
                        Some(Ok(Message::Ping(_) | Message::Pong(_))) => true,
                        Some(Ok(Message::Close(_))) | None => false,
                        Some(Err(e)) => {
                            debug!("client {client}: socket error: {e}");
                            false
                        }
                    };
                    if !keep_going {
                        break;
                    }
                }
                () = stop_requested(&mut stopping) => {
                    let frame = CloseFrame {
                        code: close_code::AWAY,
                        reason: "gateway shutting down".into(),
                    };
                    let _ = socket.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    }

    // ── Step 3: Release the control session ───────────────────────────────────
    events.on_disconnect(&client).await;
    info!("client {client} disconnected");
}

/// Resolves once the server is stopping (or the stop sender is gone).
///
/// The `watch::Ref` returned by `wait_for` holds a read guard and is not
/// `Send`, so it is dropped here instead of inside the client's `select!`.
async fn stop_requested(stopping: &mut watch::Receiver<bool>) {
    let _ = stopping.wait_for(|stop| *stop).await;
}

/// Serializes and sends one event.  Returns `false` if the socket is gone.
async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> bool {
    let json = match serde_json::to_string(event) {
        Ok(json) => json,
        Err(e) => {
            warn!("failed to serialize {event:?}: {e}");
            return true;
        }
    };
    socket.send(Message::Text(json.into())).await.is_ok()
}

/// Truncates `reason` to fit a close frame without splitting a character.
fn close_reason(reason: &str) -> String {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason.to_string();
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    reason[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    /// Compile-time check: a client task can be handed to `on_upgrade`,
    /// which requires a `Send` future.
    #[allow(dead_code)]
    fn client_task_is_send(socket: WebSocket, state: AppState) {
        fn require_send<T: Send>(_: T) {}
        require_send(handle_client(socket, state));
    }

    #[tokio::test]
    async fn test_stop_requested_resolves_when_stopping() {
        // Arrange: the waiter runs on another task, so its future must be Send
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { stop_requested(&mut stop_rx).await });

        // Act
        stop_tx.send(true).unwrap();

        // Assert
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should resolve once stopping")
            .unwrap();
    }

    #[tokio::test]
    async fn test_stop_requested_resolves_when_sender_dropped() {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        drop(stop_tx);

        tokio::time::timeout(Duration::from_secs(1), stop_requested(&mut stop_rx))
            .await
            .expect("a dropped sender means stop");
    }

    #[tokio::test]
    async fn test_stop_requested_waits_while_running() {
        let (_stop_tx, mut stop_rx) = watch::channel(false);

        let result =
            tokio::time::timeout(Duration::from_millis(50), stop_requested(&mut stop_rx)).await;

        assert!(result.is_err());
    }

    #[test]
    fn test_short_close_reason_is_kept() {
        assert_eq!(close_reason("device unreachable"), "device unreachable");
    }

    #[test]
    fn test_long_close_reason_is_truncated_on_char_boundary() {
        let reason = "é".repeat(100); // 200 bytes

        let truncated = close_reason(&reason);

        assert!(truncated.len() <= MAX_CLOSE_REASON);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
