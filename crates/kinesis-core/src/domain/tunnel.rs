//! Tunnel endpoint and tunnel request types.
//!
//! A tunnel is an authenticated, encrypted transport to the device's remote
//! service discovery (RSD) daemon.  Kinesis never looks inside it: once the
//! tunnel provider reports the endpoint, the only thing the rest of the
//! system needs is the `(address, port)` pair where RSD can be reached.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default idle timeout for a tunnel (30 seconds).
///
/// Matches the idle timeout the external tunnel provider uses when none is
/// given explicitly.
pub const DEFAULT_MAX_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Transport used by the tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelProtocol {
    /// QUIC over UDP.  The default.
    #[default]
    Quic,
    /// TLS over TCP.
    Tcp,
}

impl TunnelProtocol {
    /// Lowercase name as accepted by the external tool's `--protocol` flag.
    pub fn as_str(self) -> &'static str {
        match self {
            TunnelProtocol::Quic => "quic",
            TunnelProtocol::Tcp => "tcp",
        }
    }
}

impl fmt::Display for TunnelProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a protocol name is not `quic` or `tcp`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown tunnel protocol '{0}' (expected 'quic' or 'tcp')")]
pub struct UnknownProtocol(pub String);

impl FromStr for TunnelProtocol {
    type Err = UnknownProtocol;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // The tool prints `TunnelProtocol.QUIC` in some versions, so accept a
        // dotted prefix as well as the bare name.
        let name = s.trim().rsplit('.').next().unwrap_or_default();
        match name.to_ascii_lowercase().as_str() {
            "quic" => Ok(TunnelProtocol::Quic),
            "tcp" => Ok(TunnelProtocol::Tcp),
            _ => Err(UnknownProtocol(s.to_string())),
        }
    }
}

/// Options for a tunnel request.
#[derive(Debug, Clone, PartialEq)]
pub struct TunnelOptions {
    /// Transport protocol to request.
    pub protocol: TunnelProtocol,
    /// The tunnel closes itself after this much inactivity.
    pub max_idle_timeout: Duration,
    /// Optional TLS key-log file the provider writes session secrets to.
    pub secrets: Option<PathBuf>,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            protocol: TunnelProtocol::Quic,
            max_idle_timeout: DEFAULT_MAX_IDLE_TIMEOUT,
            secrets: None,
        }
    }
}

/// Where the device's RSD daemon can be reached through the tunnel.
///
/// This is the whole handshake between the coordinator and the gateway
/// process: the coordinator passes it on the command line at spawn time and
/// the gateway opens every control session against it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RsdAddress {
    /// Host part, usually an IPv6 literal on the tunnel interface.
    pub host: String,
    /// TCP port of the RSD service.
    pub port: u16,
}

impl RsdAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for RsdAddress {
    /// Formats as `host:port`, bracketing IPv6 literals.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// A live tunnel as reported by the tunnel provider.  Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelEndpoint {
    /// RSD address on the tunnel interface.
    pub address: String,
    /// RSD port.
    pub port: u16,
    /// Transport the tunnel was built with.
    pub protocol: TunnelProtocol,
    /// Name of the host network interface carrying the tunnel (e.g. `utun6`).
    pub interface: String,
}

impl TunnelEndpoint {
    /// The `(address, port)` pair the gateway connects control sessions to.
    pub fn rsd(&self) -> RsdAddress {
        RsdAddress::new(self.address.clone(), self.port)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
