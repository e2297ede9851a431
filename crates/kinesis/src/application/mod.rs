//! Application layer for the kinesis coordinator.
//!
//! # Responsibilities
//!
//! - Driving the launch state machine (`LaunchCoordinator`)
//! - Device selection rules (`select_device`)
//! - Defining the `LaunchError` type and the gateway/chooser seams
//!
//! # What does NOT belong here?
//!
//! - Spawning processes or reading the terminal (that is infrastructure)
//! - Parsing the external tool's output (that is `kinesis-device`)

pub mod launch;

pub use launch::{
    select_device, Collaborators, DeviceChooser, GatewayHandle, GatewayLauncher, LaunchCoordinator,
    LaunchError, LaunchOptions, LaunchOutcome, Selection, DEFAULT_SHUTDOWN_GRACE,
};
