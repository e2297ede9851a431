//! # kinesis-core
//!
//! Shared library for Kinesis containing the domain entities and the
//! collaborator traits that the coordinator and the gateway are written
//! against.
//!
//! This crate is used by every other crate in the workspace.  It has zero
//! dependencies on OS APIs, sockets, or child processes.
//!
//! # Architecture overview (for beginners)
//!
//! Kinesis injects a simulated GPS position into a connected iOS device.
//! The hard parts (finding the device, building an encrypted tunnel to it,
//! speaking the device automation protocol) are done by an external tool.
//! Kinesis only coordinates the lifecycle around that tool:
//!
//! ```text
//! kinesis (coordinator)            kinesis-gateway (separate process)
//!   discover device                  browser ⇄ WebSocket
//!   start tunnel  ──(host, port)──►  one control session per browser
//!   announce endpoint                set / clear simulated location
//!   wait for tunnel close
//! ```
//!
//! This crate defines:
//!
//! - **`domain`** – Pure value types: the device handle, the tunnel endpoint,
//!   and the location command with its text parser.
//!
//! - **`ports`** – The traits ("ports") that describe each external
//!   collaborator.  Infrastructure crates implement them; tests replace them
//!   with recording doubles.

pub mod domain;
pub mod ports;

// Re-export the most-used types at the crate root so callers can write
// `kinesis_core::TunnelEndpoint` instead of the full module path.
pub use domain::device::DeviceHandle;
pub use domain::location::{parse_location, Coordinates, LocationCommand, MalformedLocation};
pub use domain::tunnel::{RsdAddress, TunnelEndpoint, TunnelOptions, TunnelProtocol};
pub use ports::{
    ActiveTunnel, ControlError, ControlSession, ControlSessionFactory, DeviceProvider,
    ProviderError, TunnelProvider,
};
