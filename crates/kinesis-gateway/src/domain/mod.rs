//! Domain layer for kinesis-gateway.
//!
//! Pure types with no dependencies on I/O, networking, or async runtimes:
//!
//! - The identity of a connected UI client
//! - The JSON event types exchanged with the browser
//! - The gateway configuration
//!
//! Anything that opens a socket or spawns a task lives in `infrastructure`.

pub mod config;
pub mod messages;
pub mod session;

pub use config::GatewayConfig;
pub use messages::{AckedEvent, ClientEvent, ErrorKind, ServerEvent};
pub use session::ClientId;
