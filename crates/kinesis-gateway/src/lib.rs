//! kinesis-gateway library crate.
//!
//! This crate serves the location-simulation web UI and binds every connected
//! browser to its own device control session.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Browser (JSON over WebSocket)
//!         ↕
//! [kinesis-gateway]
//!   ├── domain/           Pure types: client ids, JSON events, GatewayConfig
//!   ├── application/      Session registry and the connect/message/disconnect handler
//!   └── infrastructure/
//!         ├── ws_server/  HTTP + WebSocket server (axum), static assets
//!         └── shutdown/   Ctrl+C and parent-exit detection
//!         ↕
//! Device control sessions (kinesis_core::ControlSession) over the tunnel
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O and no async.
//! - `application` depends on `domain` and the `kinesis_core` traits only, so
//!   it can be tested with recording doubles instead of a device.
//! - `infrastructure` depends on all other layers plus `tokio` and `axum`.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: session registry and event handling.
pub mod application;

/// Infrastructure layer: HTTP/WebSocket server and shutdown signals.
pub mod infrastructure;
