//! Domain entities for Kinesis.
//!
//! This module contains pure value types with no infrastructure dependencies.
//!
//! # What is "domain" in Clean Architecture? (for beginners)
//!
//! The innermost layer of a Clean Architecture project is the **domain**.
//! Domain code has no imports from OS APIs, network libraries, or process
//! management.  It can be compiled and tested anywhere without a device
//! attached, which is exactly what we want for the parts of Kinesis that
//! carry rules (for example: "a location is two finite numbers separated by a
//! comma").

/// Connected device metadata.
pub mod device;

/// Simulated location commands and the `"lat,lon"` text parser.
pub mod location;

/// Tunnel endpoint and tunnel request options.
pub mod tunnel;
