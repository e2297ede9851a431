//! Launch coordinator states.
//!
//! ```text
//! Discovering ──► TunnelEstablishing ──► TunnelActive ──► ShuttingDown ──► Closed
//!      │                   │
//!      └── fatal error / interrupt ──────────────────────────────────────► Closed
//! ```
//!
//! - `Discovering`: listing devices and picking one.
//! - `TunnelEstablishing`: asking the tunnel provider for a tunnel.
//! - `TunnelActive`: endpoint announced, gateway running, waiting for the
//!   tunnel to close or for an interrupt.
//! - `ShuttingDown`: tunnel closed (or being closed); the gateway is released.
//! - `Closed`: terminal.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchState {
    Discovering,
    TunnelEstablishing,
    TunnelActive,
    ShuttingDown,
    Closed,
}

impl LaunchState {
    pub fn is_terminal(self) -> bool {
        self == LaunchState::Closed
    }
}

impl fmt::Display for LaunchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LaunchState::Discovering => "discovering",
            LaunchState::TunnelEstablishing => "tunnel-establishing",
            LaunchState::TunnelActive => "tunnel-active",
            LaunchState::ShuttingDown => "shutting-down",
            LaunchState::Closed => "closed",
        };
        f.write_str(name)
    }
}
