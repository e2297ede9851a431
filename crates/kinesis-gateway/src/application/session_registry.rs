//! SessionRegistry: one device control session per connected UI client.
//!
//! The registry is the gateway's in-memory table of live control sessions,
//! keyed by [`ClientId`].  It is the only owner of the session handles; the
//! WebSocket layer only ever refers to a session by client id.
//!
//! # Entry lifecycle (for beginners)
//!
//! ```text
//!            open()                 handshake ok
//!   (absent) ──────►  Opening  ───────────────────►  Live
//!      ▲                 │                             │ close()
//!      │  handshake      │ close() during handshake    ▼
//!      │  failed         ▼                          Closing
//!      └────────────── (absent) ◄──────────────────────┘
//!                              clear + close done
//! ```
//!
//! - `Opening`: the client id is reserved so a second `open` for the same id
//!   fails fast with [`SessionError::DuplicateSession`].
//! - `Live`: commands from [`SessionRegistry::apply`] reach the device.
//! - `Closing`: the entry is still in the table, but it no longer accepts
//!   commands.  It is removed only after the simulated location has been
//!   cleared and the handle released.
//!
//! # Concurrency
//!
//! The table sits behind a `std::sync::Mutex` that is never held across an
//! `.await`.  Each session handle has its own `tokio::sync::Mutex`, so
//! commands for one client are serialized while different clients proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use kinesis_core::{ControlError, ControlSession, ControlSessionFactory, LocationCommand, RsdAddress};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::domain::ClientId;

/// Errors surfaced by [`SessionRegistry`].
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("client {0} already has a control session")]
    DuplicateSession(ClientId),

    #[error("client {0} has no live control session")]
    UnknownSession(ClientId),

    #[error("could not open a control session for client {client}: {source}")]
    Handshake {
        client: ClientId,
        #[source]
        source: ControlError,
    },

    #[error("device command for client {client} failed: {source}")]
    DeviceCommand {
        client: ClientId,
        #[source]
        source: ControlError,
    },
}

// ── Table entries ─────────────────────────────────────────────────────────────

enum Slot {
    /// Handshake in progress; reserves the client id.
    Opening,
    Live(Arc<SessionEntry>),
}

struct SessionEntry {
    handle: tokio::sync::Mutex<Box<dyn ControlSession>>,
    /// Set once by the first `close`; later commands are refused.
    closing: AtomicBool,
    /// Flips to `true` when teardown has finished.
    released: watch::Sender<bool>,
}

impl SessionEntry {
    fn new(handle: Box<dyn ControlSession>) -> Self {
        Self {
            handle: tokio::sync::Mutex::new(handle),
            closing: AtomicBool::new(false),
            released: watch::Sender::new(false),
        }
    }

    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Clears the simulated position, then releases the handle.
    ///
    /// Failures are logged and swallowed: teardown must run to completion
    /// even when the device is already gone.
    async fn teardown(&self, client: &ClientId) {
        let mut handle = self.handle.lock().await;
        if let Err(e) = handle.clear_location().await {
            warn!("clearing simulated location for client {client} failed: {e}");
        }
        if let Err(e) = handle.close().await {
            warn!("closing control session for client {client} failed: {e}");
        }
        self.released.send_replace(true);
    }

    async fn wait_released(&self) {
        let mut released = self.released.subscribe();
        // The sender lives in `self`, so this cannot fail while we hold it.
        let _ = released.wait_for(|done| *done).await;
    }
}

/// Removes an `Opening` reservation if `open` is abandoned before the
/// handshake result is recorded (error return or dropped future).
struct Reservation<'a> {
    registry: &'a SessionRegistry,
    client: &'a ClientId,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut table = self.registry.table();
        if matches!(table.get(self.client), Some(Slot::Opening)) {
            table.remove(self.client);
        }
    }
}

// ── SessionRegistry ───────────────────────────────────────────────────────────

/// Mapping from UI client to its device control session.
pub struct SessionRegistry {
    rsd: RsdAddress,
    factory: Arc<dyn ControlSessionFactory>,
    sessions: Mutex<HashMap<ClientId, Slot>>,
}

impl SessionRegistry {
    /// Creates an empty registry that opens sessions against `rsd`.
    pub fn new(rsd: RsdAddress, factory: Arc<dyn ControlSessionFactory>) -> Self {
        Self {
            rsd,
            factory,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn rsd(&self) -> &RsdAddress {
        &self.rsd
    }

    /// Opens a control session for `client` and stores it.
    ///
    /// # Errors
    ///
    /// - [`SessionError::DuplicateSession`] if `client` already has an entry
    ///   (opening or live).  The existing session is left untouched.
    /// - [`SessionError::Handshake`] if the device cannot be reached.  Nothing
    ///   is stored, so the client may retry.  A session whose client was
    ///   closed during the handshake is released and reported the same way.
    pub async fn open(&self, client: &ClientId) -> Result<(), SessionError> {
        {
            let mut table = self.table();
            if table.contains_key(client) {
                return Err(SessionError::DuplicateSession(client.clone()));
            }
            table.insert(client.clone(), Slot::Opening);
        }
        let mut reservation = Reservation {
            registry: self,
            client,
            armed: true,
        };

        debug!("opening control session for client {client} via {}", self.rsd);
        let handle = self
            .factory
            .connect(&self.rsd)
            .await
            .map_err(|source| SessionError::Handshake {
                client: client.clone(),
                source,
            })?;

        let entry = Arc::new(SessionEntry::new(handle));
        let admitted = {
            let mut table = self.table();
            match table.get_mut(client) {
                Some(slot) if matches!(slot, Slot::Opening) => {
                    *slot = Slot::Live(Arc::clone(&entry));
                    true
                }
                _ => false,
            }
        };
        reservation.armed = false;

        if admitted {
            info!("control session opened for client {client}");
            Ok(())
        } else {
            // Closed while the handshake was in flight: release the new handle.
            debug!("client {client} left during handshake; releasing session");
            entry.teardown(client).await;
            Err(SessionError::Handshake {
                client: client.clone(),
                source: ControlError::Closed,
            })
        }
    }

    /// Forwards one command to the session owned by `client`.
    ///
    /// Commands for the same client are applied in arrival order.
    ///
    /// # Errors
    ///
    /// - [`SessionError::UnknownSession`] if `client` has no live session,
    ///   including one whose close has begun.  No device command is issued.
    /// - [`SessionError::DeviceCommand`] if the device rejects the command.
    ///   The session stays registered.
    pub async fn apply(&self, client: &ClientId, command: LocationCommand) -> Result<(), SessionError> {
        let entry = self
            .live_entry(client)
            .ok_or_else(|| SessionError::UnknownSession(client.clone()))?;

        let mut handle = entry.handle.lock().await;
        if entry.is_closing() {
            return Err(SessionError::UnknownSession(client.clone()));
        }

        let result = match command {
            LocationCommand::Set(coords) => {
                debug!("client {client}: set location {coords}");
                handle.set_location(coords.latitude, coords.longitude).await
            }
            LocationCommand::Clear => {
                debug!("client {client}: clear location");
                handle.clear_location().await
            }
        };
        result.map_err(|source| SessionError::DeviceCommand {
            client: client.clone(),
            source,
        })
    }

    /// Clears the simulated position, releases the handle, and forgets `client`.
    ///
    /// Idempotent and infallible: an unknown client, a repeated close, or a
    /// device error during teardown is logged, never returned.  The entry is
    /// removed only after the handle has been closed.  A close that overlaps
    /// one already in progress waits for it instead of clearing again.
    pub async fn close(&self, client: &ClientId) {
        let (entry, first) = {
            let mut table = self.table();
            match table.get(client) {
                None => {
                    debug!("close for client {client} without a session");
                    return;
                }
                Some(Slot::Opening) => {
                    table.remove(client);
                    return;
                }
                Some(Slot::Live(entry)) => {
                    (Arc::clone(entry), !entry.closing.swap(true, Ordering::SeqCst))
                }
            }
        };

        if !first {
            entry.wait_released().await;
            return;
        }
        entry.teardown(client).await;
        self.table().remove(client);
        info!("control session closed for client {client}");
    }

    /// Closes every registered session.  Used at gateway shutdown.
    pub async fn close_all(&self) {
        let clients: Vec<ClientId> = self.table().keys().cloned().collect();
        if clients.is_empty() {
            return;
        }
        info!("closing {} control session(s)", clients.len());
        join_all(clients.iter().map(|client| self.close(client))).await;
    }

    /// Number of entries, including sessions still opening or closing.
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns `true` if `client` has a live session that accepts commands.
    pub fn is_live(&self, client: &ClientId) -> bool {
        self.live_entry(client).is_some()
    }

    // ── Private helpers ───────────────────────────────────────────────────────

    fn table(&self) -> MutexGuard<'_, HashMap<ClientId, Slot>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn live_entry(&self, client: &ClientId) -> Option<Arc<SessionEntry>> {
        match self.table().get(client) {
            Some(Slot::Live(entry)) if !entry.is_closing() => Some(Arc::clone(entry)),
            _ => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use kinesis_core::Coordinates;
    use tokio::sync::Notify;

    // ── Test doubles ──────────────────────────────────────────────────────────

    /// One call observed on a recording session, tagged with the session's
    /// sequence number (the order in which `connect` created it).
    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Set(usize, f64, f64),
        Clear(usize),
        Close(usize),
    }

    #[derive(Default)]
    struct Behaviour {
        fail_connect: bool,
        fail_set: bool,
        fail_clear: bool,
    }

    #[derive(Default)]
    struct RecordingFactory {
        behaviour: Behaviour,
        calls: Arc<std::sync::Mutex<Vec<Call>>>,
        connects: std::sync::Mutex<usize>,
        /// When set, `connect` waits for a notification before returning.
        gate: Option<Arc<Notify>>,
    }

    impl RecordingFactory {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }

        fn connects(&self) -> usize {
            *self.connects.lock().unwrap()
        }
    }

    #[async_trait]
    impl ControlSessionFactory for RecordingFactory {
        async fn connect(&self, _rsd: &RsdAddress) -> Result<Box<dyn ControlSession>, ControlError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.behaviour.fail_connect {
                return Err(ControlError::Closed);
            }
            let id = {
                let mut n = self.connects.lock().unwrap();
                *n += 1;
                *n
            };
            Ok(Box::new(RecordingSession {
                id,
                calls: Arc::clone(&self.calls),
                fail_set: self.behaviour.fail_set,
                fail_clear: self.behaviour.fail_clear,
            }))
        }
    }

    struct RecordingSession {
        id: usize,
        calls: Arc<std::sync::Mutex<Vec<Call>>>,
        fail_set: bool,
        fail_clear: bool,
    }

    fn injected(what: &str) -> ControlError {
        ControlError::CommandFailed {
            command: what.to_string(),
            detail: "injected failure".to_string(),
        }
    }

    #[async_trait]
    impl ControlSession for RecordingSession {
        async fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<(), ControlError> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Set(self.id, latitude, longitude));
            if self.fail_set {
                return Err(injected("set"));
            }
            Ok(())
        }

        async fn clear_location(&mut self) -> Result<(), ControlError> {
            self.calls.lock().unwrap().push(Call::Clear(self.id));
            if self.fail_clear {
                return Err(injected("clear"));
            }
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ControlError> {
            self.calls.lock().unwrap().push(Call::Close(self.id));
            Ok(())
        }
    }

    fn make_registry(factory: RecordingFactory) -> (Arc<SessionRegistry>, Arc<RecordingFactory>) {
        let factory = Arc::new(factory);
        let registry = Arc::new(SessionRegistry::new(
            RsdAddress::new("fd7b::1", 58783),
            Arc::clone(&factory) as Arc<dyn ControlSessionFactory>,
        ));
        (registry, factory)
    }

    fn set(lat: f64, lon: f64) -> LocationCommand {
        LocationCommand::Set(Coordinates {
            latitude: lat,
            longitude: lon,
        })
    }

    // ── open ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_open_registers_live_session() {
        // Arrange
        let (registry, factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");

        // Act
        registry.open(&c1).await.unwrap();

        // Assert
        assert!(registry.is_live(&c1));
        assert_eq!(registry.len(), 1);
        assert_eq!(factory.connects(), 1);
    }

    #[tokio::test]
    async fn test_open_twice_is_duplicate_and_keeps_original() {
        let (registry, factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");
        registry.open(&c1).await.unwrap();

        let result = registry.open(&c1).await;

        assert!(matches!(result, Err(SessionError::DuplicateSession(_))));
        assert_eq!(factory.connects(), 1, "no second handshake");
        registry.apply(&c1, set(1.0, 2.0)).await.unwrap();
        assert_eq!(factory.calls(), vec![Call::Set(1, 1.0, 2.0)]);
    }

    #[tokio::test]
    async fn test_open_with_failed_handshake_stores_nothing() {
        let (registry, _factory) = make_registry(RecordingFactory {
            behaviour: Behaviour {
                fail_connect: true,
                ..Behaviour::default()
            },
            ..RecordingFactory::default()
        });
        let c1 = ClientId::from("c1");

        let result = registry.open(&c1).await;

        assert!(matches!(result, Err(SessionError::Handshake { .. })));
        assert!(registry.is_empty());
        // The id is free again, so a retry reaches the factory instead of
        // failing as a duplicate.
        assert!(matches!(
            registry.open(&c1).await,
            Err(SessionError::Handshake { .. })
        ));
    }

    #[tokio::test]
    async fn test_open_during_handshake_is_duplicate() {
        // Arrange: first open blocks inside connect
        let gate = Arc::new(Notify::new());
        let (registry, _factory) = make_registry(RecordingFactory {
            gate: Some(Arc::clone(&gate)),
            ..RecordingFactory::default()
        });
        let c1 = ClientId::from("c1");
        let first = tokio::spawn({
            let registry = Arc::clone(&registry);
            let c1 = c1.clone();
            async move { registry.open(&c1).await }
        });
        while registry.is_empty() {
            tokio::task::yield_now().await;
        }

        // Act
        let second = registry.open(&c1).await;
        gate.notify_one();

        // Assert
        assert!(matches!(second, Err(SessionError::DuplicateSession(_))));
        assert!(first.await.unwrap().is_ok());
        assert!(registry.is_live(&c1));
    }

    #[tokio::test]
    async fn test_close_during_handshake_releases_new_session() {
        // Arrange
        let gate = Arc::new(Notify::new());
        let (registry, factory) = make_registry(RecordingFactory {
            gate: Some(Arc::clone(&gate)),
            ..RecordingFactory::default()
        });
        let c1 = ClientId::from("c1");
        let opening = tokio::spawn({
            let registry = Arc::clone(&registry);
            let c1 = c1.clone();
            async move { registry.open(&c1).await }
        });
        while registry.is_empty() {
            tokio::task::yield_now().await;
        }

        // Act: the client disconnects before the handshake finishes
        registry.close(&c1).await;
        gate.notify_one();
        let result = opening.await.unwrap();

        // Assert: the late handle is cleared and closed, never stored
        assert!(matches!(
            result,
            Err(SessionError::Handshake {
                source: ControlError::Closed,
                ..
            })
        ));
        assert!(registry.is_empty());
        assert_eq!(factory.calls(), vec![Call::Clear(1), Call::Close(1)]);
    }

    #[tokio::test]
    async fn test_abandoned_open_frees_the_client_id() {
        let gate = Arc::new(Notify::new());
        let (registry, _factory) = make_registry(RecordingFactory {
            gate: Some(Arc::clone(&gate)),
            ..RecordingFactory::default()
        });
        let c1 = ClientId::from("c1");
        let opening = tokio::spawn({
            let registry = Arc::clone(&registry);
            let c1 = c1.clone();
            async move { registry.open(&c1).await }
        });
        while registry.is_empty() {
            tokio::task::yield_now().await;
        }

        opening.abort();
        let _ = opening.await;

        assert!(registry.is_empty());
    }

    // ── apply ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_apply_routes_only_to_owning_session() {
        // Arrange: two clients, two sessions
        let (registry, factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");
        let c2 = ClientId::from("c2");
        registry.open(&c1).await.unwrap();
        registry.open(&c2).await.unwrap();

        // Act
        registry.apply(&c2, set(48.8584, 2.2945)).await.unwrap();
        registry.apply(&c1, LocationCommand::Clear).await.unwrap();

        // Assert
        assert_eq!(
            factory.calls(),
            vec![Call::Set(2, 48.8584, 2.2945), Call::Clear(1)]
        );
    }

    #[tokio::test]
    async fn test_apply_preserves_arrival_order() {
        let (registry, factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");
        registry.open(&c1).await.unwrap();

        registry.apply(&c1, set(1.0, 1.0)).await.unwrap();
        registry.apply(&c1, set(2.0, 2.0)).await.unwrap();
        registry.apply(&c1, LocationCommand::Clear).await.unwrap();

        assert_eq!(
            factory.calls(),
            vec![Call::Set(1, 1.0, 1.0), Call::Set(1, 2.0, 2.0), Call::Clear(1)]
        );
    }

    #[tokio::test]
    async fn test_apply_for_unknown_client_issues_no_command() {
        let (registry, factory) = make_registry(RecordingFactory::default());

        let result = registry.apply(&ClientId::from("ghost"), set(1.0, 2.0)).await;

        assert!(matches!(result, Err(SessionError::UnknownSession(_))));
        assert!(factory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_device_failure_keeps_session_registered() {
        let (registry, _factory) = make_registry(RecordingFactory {
            behaviour: Behaviour {
                fail_set: true,
                ..Behaviour::default()
            },
            ..RecordingFactory::default()
        });
        let c1 = ClientId::from("c1");
        registry.open(&c1).await.unwrap();

        let result = registry.apply(&c1, set(1.0, 2.0)).await;

        assert!(matches!(result, Err(SessionError::DeviceCommand { .. })));
        assert!(registry.is_live(&c1));
    }

    #[tokio::test]
    async fn test_apply_after_close_is_unknown() {
        let (registry, factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");
        registry.open(&c1).await.unwrap();
        registry.close(&c1).await;

        let result = registry.apply(&c1, set(1.0, 2.0)).await;

        assert!(matches!(result, Err(SessionError::UnknownSession(_))));
        assert_eq!(factory.calls(), vec![Call::Clear(1), Call::Close(1)]);
    }

    // ── close ─────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_close_clears_then_closes_then_forgets() {
        let (registry, factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");
        registry.open(&c1).await.unwrap();
        registry.apply(&c1, set(37.3349, -122.009)).await.unwrap();

        registry.close(&c1).await;

        assert_eq!(
            factory.calls(),
            vec![Call::Set(1, 37.3349, -122.009), Call::Clear(1), Call::Close(1)]
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (registry, factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");
        registry.open(&c1).await.unwrap();

        registry.close(&c1).await;
        registry.close(&c1).await;

        assert_eq!(factory.calls(), vec![Call::Clear(1), Call::Close(1)]);
    }

    #[tokio::test]
    async fn test_concurrent_closes_clear_once() {
        let (registry, factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");
        registry.open(&c1).await.unwrap();

        tokio::join!(registry.close(&c1), registry.close(&c1));

        assert_eq!(factory.calls(), vec![Call::Clear(1), Call::Close(1)]);
    }

    #[tokio::test]
    async fn test_close_unknown_client_is_noop() {
        let (registry, factory) = make_registry(RecordingFactory::default());

        registry.close(&ClientId::from("ghost")).await;

        assert!(factory.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_clear_still_closes_and_removes() {
        let (registry, factory) = make_registry(RecordingFactory {
            behaviour: Behaviour {
                fail_clear: true,
                ..Behaviour::default()
            },
            ..RecordingFactory::default()
        });
        let c1 = ClientId::from("c1");
        registry.open(&c1).await.unwrap();

        registry.close(&c1).await;

        assert_eq!(factory.calls(), vec![Call::Clear(1), Call::Close(1)]);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_closing_one_client_leaves_others_live() {
        let (registry, _factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");
        let c2 = ClientId::from("c2");
        registry.open(&c1).await.unwrap();
        registry.open(&c2).await.unwrap();

        registry.close(&c1).await;

        assert!(!registry.is_live(&c1));
        assert!(registry.is_live(&c2));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_close_all_releases_every_session() {
        let (registry, factory) = make_registry(RecordingFactory::default());
        for name in ["c1", "c2", "c3"] {
            registry.open(&ClientId::from(name)).await.unwrap();
        }

        registry.close_all().await;

        assert!(registry.is_empty());
        let calls = factory.calls();
        for id in 1..=3 {
            assert!(calls.contains(&Call::Clear(id)));
            assert!(calls.contains(&Call::Close(id)));
        }
    }

    #[tokio::test]
    async fn test_reopen_after_close_creates_fresh_session() {
        let (registry, factory) = make_registry(RecordingFactory::default());
        let c1 = ClientId::from("c1");
        registry.open(&c1).await.unwrap();
        registry.close(&c1).await;

        registry.open(&c1).await.unwrap();
        registry.apply(&c1, set(5.0, 6.0)).await.unwrap();

        assert_eq!(factory.connects(), 2);
        assert_eq!(factory.calls().last(), Some(&Call::Set(2, 5.0, 6.0)));
    }
}
