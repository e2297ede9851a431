//! Gateway: turns UI connection events into session registry calls.
//!
//! The transport (axum WebSocket in production, direct calls in tests) only
//! sees the [`SessionEvents`] trait:
//!
//! ```text
//! connect     ──► on_connect     ──► registry.open
//! text frame  ──► on_message     ──► parse ──► registry.apply ──► ack / error
//! disconnect  ──► on_disconnect  ──► registry.close
//! ```
//!
//! Every incoming message produces exactly one reply event, so the browser can
//! tell an applied location from a rejected one.

use std::sync::Arc;

use async_trait::async_trait;
use kinesis_core::{parse_location, LocationCommand, MalformedLocation};
use thiserror::Error;
use tracing::warn;

use crate::application::session_registry::{SessionError, SessionRegistry};
use crate::domain::{AckedEvent, ClientEvent, ClientId, ErrorKind, ServerEvent};

/// Why a client message was not applied.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("malformed event: {0}")]
    MalformedEvent(#[from] serde_json::Error),

    #[error(transparent)]
    MalformedLocation(#[from] MalformedLocation),

    #[error(transparent)]
    Session(#[from] SessionError),
}

impl MessageError {
    /// The wire category reported to the browser.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::MalformedEvent(_) => ErrorKind::MalformedEvent,
            Self::MalformedLocation(_) => ErrorKind::MalformedLocation,
            Self::Session(SessionError::DeviceCommand { .. }) => ErrorKind::DeviceCommand,
            Self::Session(_) => ErrorKind::UnknownSession,
        }
    }
}

/// Connection lifecycle callbacks invoked by the transport layer.
#[async_trait]
pub trait SessionEvents: Send + Sync {
    /// A UI client connected.  An error means the connection must be refused.
    async fn on_connect(&self, client: &ClientId) -> Result<(), SessionError>;

    /// A text frame arrived.  Returns the reply to send back.
    async fn on_message(&self, client: &ClientId, payload: &str) -> ServerEvent;

    /// The UI client went away.  Always completes.
    async fn on_disconnect(&self, client: &ClientId);
}

/// [`SessionEvents`] implementation backed by a [`SessionRegistry`].
pub struct Gateway {
    registry: Arc<SessionRegistry>,
}

impl Gateway {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Parses and applies one client event.
    ///
    /// A malformed location is rejected before the registry is touched.
    pub async fn handle(&self, client: &ClientId, payload: &str) -> Result<AckedEvent, MessageError> {
        match serde_json::from_str::<ClientEvent>(payload)? {
            ClientEvent::Location { data } => {
                let coords = parse_location(&data)?;
                self.registry
                    .apply(client, LocationCommand::Set(coords))
                    .await?;
                Ok(AckedEvent::Location)
            }
            ClientEvent::Clear => {
                self.registry.apply(client, LocationCommand::Clear).await?;
                Ok(AckedEvent::Clear)
            }
        }
    }
}

#[async_trait]
impl SessionEvents for Gateway {
    async fn on_connect(&self, client: &ClientId) -> Result<(), SessionError> {
        self.registry.open(client).await
    }

    async fn on_message(&self, client: &ClientId, payload: &str) -> ServerEvent {
        match self.handle(client, payload).await {
            Ok(event) => ServerEvent::Ack { event },
            Err(e) => {
                warn!("client {client}: {e}");
                ServerEvent::error(e.kind(), e.to_string())
            }
        }
    }

    async fn on_disconnect(&self, client: &ClientId) {
        self.registry.close(client).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
