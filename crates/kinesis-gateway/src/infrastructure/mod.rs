//! Infrastructure layer for kinesis-gateway.
//!
//! The infrastructure layer handles all I/O: the HTTP listener, the WebSocket
//! upgrade, the embedded web UI, and the signals that stop the process.
//!
//! # Responsibilities
//!
//! - Binding the loopback listener and reporting the chosen port
//! - Serving the three static UI assets
//! - Running one task per WebSocket client and forwarding its frames to the
//!   application layer
//! - Detecting Ctrl+C and the coordinator's exit (stdin end-of-file)
//! - Closing every session before the process exits
//!
//! # What does NOT belong here?
//!
//! - Event parsing and the session table (that is the application layer)
//! - Configuration parsing (that is done in `main.rs`)

pub mod assets;
pub mod shutdown;
pub mod ws_server;

pub use shutdown::shutdown_signal;
pub use ws_server::{router, GatewayServer};
