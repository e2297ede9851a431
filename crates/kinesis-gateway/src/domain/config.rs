//! Gateway configuration.
//!
//! [`GatewayConfig`] is built once at startup from CLI arguments and passed
//! into the server by value.  The RSD address in it is the only information
//! the coordinator hands to the gateway process.

use std::net::{Ipv4Addr, SocketAddr};

use kinesis_core::RsdAddress;

/// Default bind address: loopback, ephemeral port.
///
/// The UI endpoint has no authentication, so it must not be reachable from
/// other machines unless the operator asks for it.
pub const DEFAULT_BIND: SocketAddr = SocketAddr::new(std::net::IpAddr::V4(Ipv4Addr::LOCALHOST), 0);

/// All runtime configuration for the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Address the HTTP/WebSocket server binds to.  Port `0` picks a free port.
    pub bind_addr: SocketAddr,

    /// RSD endpoint every control session is opened against.
    pub rsd: RsdAddress,

    /// Stop when stdin reaches end-of-file.
    ///
    /// Set by the coordinator, which keeps the write end of the pipe open for
    /// as long as it runs.
    pub watch_stdin: bool,
}

impl GatewayConfig {
    /// Loopback, ephemeral port, no stdin watch.
    pub fn new(rsd: RsdAddress) -> Self {
        Self {
            bind_addr: DEFAULT_BIND,
            rsd,
            watch_stdin: false,
        }
    }
}
