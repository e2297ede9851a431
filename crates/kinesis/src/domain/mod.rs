//! Domain layer for the kinesis coordinator.
//!
//! - [`LaunchState`]: the states the coordinator moves through.
//! - [`Announcement`]: the connection summary printed once the tunnel is up.

pub mod announcement;
pub mod state;

pub use announcement::{AnnounceStyle, Announcement};
pub use state::LaunchState;
