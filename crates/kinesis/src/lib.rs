//! kinesis library crate.
//!
//! This crate holds the launch coordinator: the part of Kinesis that finds a
//! device, starts a tunnel to it, announces the tunnel's RSD endpoint and
//! starts the realtime gateway as a separate process.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! kinesis (this crate)
//!   ├── domain/             Launch states, connection announcement
//!   ├── application/        LaunchCoordinator state machine, device selection
//!   └── infrastructure/
//!         ├── config/       TOML config file
//!         ├── gateway_process/  Spawning and releasing kinesis-gateway
//!         └── prompt/       Interactive device prompt
//!         ↕
//! kinesis-device (device listing, tunnel) ─── external tool
//! kinesis-gateway (separate process) ─── browsers
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` talks to the outside world only through traits
//!   (`DeviceProvider`, `TunnelProvider`, `GatewayLauncher`, `DeviceChooser`),
//!   so every launch scenario can be tested without a device.
//! - `infrastructure` provides the concrete implementations used by `main.rs`.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: the launch state machine.
pub mod application;

/// Infrastructure layer: config file, gateway process, terminal prompt.
pub mod infrastructure;
