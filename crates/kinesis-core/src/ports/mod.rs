//! Collaborator traits ("ports") for everything Kinesis does not implement
//! itself.
//!
//! Device enumeration, tunnel cryptography and the device automation protocol
//! are provided by an external library.  The coordinator and the gateway are
//! written against the traits in this module only, so:
//!
//! - the real adapter (`kinesis-device`) can drive whatever external tool is
//!   installed, and
//! - tests can substitute recording doubles and run without a device.
//!
//! All traits are `async` via `async_trait` because every operation may
//! block on the network or on a child process.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::device::DeviceHandle;
use crate::domain::tunnel::{RsdAddress, TunnelEndpoint, TunnelOptions, TunnelProtocol};

// ── Error types ───────────────────────────────────────────────────────────────

/// Failures reported by the device or tunnel provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The host cannot build this kind of tunnel (missing tool, missing
    /// platform support for the transport).
    #[error("unsupported on this platform: {0}")]
    Unsupported(String),

    /// The external program could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The external program ran but reported failure.
    #[error("'{command}' failed ({status}): {detail}")]
    ToolFailed {
        command: String,
        status: String,
        detail: String,
    },

    /// The external program produced output that could not be understood.
    #[error("unexpected provider output: {0}")]
    UnexpectedOutput(String),

    /// Any other I/O failure while talking to the provider.
    #[error("provider I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of a device control session.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The RSD endpoint could not be reached through the tunnel.
    #[error("cannot reach RSD at {addr}: {source}")]
    Unreachable {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The external program could not be started.
    #[error("failed to start '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The device rejected the command or the tool reported failure.
    #[error("device command '{command}' failed: {detail}")]
    CommandFailed { command: String, detail: String },

    /// The session was already closed.
    #[error("control session is closed")]
    Closed,

    /// Any other I/O failure on the session.
    #[error("control session I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Device discovery ──────────────────────────────────────────────────────────

/// Enumerates devices currently attached to the host.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Returns every device that could host a tunnel right now.
    ///
    /// An empty vector is not an error; the caller decides what to do with it.
    async fn list_devices(&self) -> Result<Vec<DeviceHandle>, ProviderError>;
}

// ── Tunnel ────────────────────────────────────────────────────────────────────

/// Builds authenticated tunnels to a device's RSD daemon.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Checks that this host can build a tunnel over `protocol`.
    ///
    /// # Errors
    ///
    /// [`ProviderError::Unsupported`] when the capability is absent.
    async fn check_support(&self, protocol: TunnelProtocol) -> Result<(), ProviderError>;

    /// Starts a tunnel and returns once its endpoint is known.
    async fn start_tunnel(
        &self,
        device: &DeviceHandle,
        options: &TunnelOptions,
    ) -> Result<Box<dyn ActiveTunnel>, ProviderError>;
}

/// A live tunnel owned by the coordinator.
#[async_trait]
pub trait ActiveTunnel: Send {
    /// The endpoint reported when the tunnel came up.
    fn endpoint(&self) -> &TunnelEndpoint;

    /// Resolves when the tunnel closes on its own (peer closed, idle timeout).
    async fn wait_closed(&mut self) -> Result<(), ProviderError>;

    /// Tears the tunnel down.  Calling it on an already closed tunnel is a
    /// no-op.
    async fn close(&mut self) -> Result<(), ProviderError>;
}

// ── Device control ────────────────────────────────────────────────────────────

/// Opens device control sessions against a fixed RSD endpoint.
#[async_trait]
pub trait ControlSessionFactory: Send + Sync {
    /// Connects to RSD and performs the control-protocol handshake.
    ///
    /// Not retried: the tunnel is assumed to be live already.
    async fn connect(&self, rsd: &RsdAddress) -> Result<Box<dyn ControlSession>, ControlError>;
}

/// One device control session, able to set and clear the simulated location.
///
/// A session is only ever driven by one task at a time; the registry wraps it
/// in its own lock.
#[async_trait]
pub trait ControlSession: Send {
    async fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<(), ControlError>;

    async fn clear_location(&mut self) -> Result<(), ControlError>;

    /// Releases the session and its underlying RSD connection.
    async fn close(&mut self) -> Result<(), ControlError>;
}
