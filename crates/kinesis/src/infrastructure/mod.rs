//! Infrastructure layer for the kinesis coordinator.
//!
//! # Responsibilities
//!
//! - Loading the TOML config file from the platform config directory
//! - Spawning `kinesis-gateway` and releasing it at shutdown
//! - Asking the user to pick a device on a terminal

pub mod config;
pub mod gateway_process;
pub mod prompt;

pub use config::{load_config, ConfigError, KinesisConfig};
pub use gateway_process::{default_gateway_binary, GatewaySettings, ProcessGatewayLauncher};
pub use prompt::TerminalChooser;
