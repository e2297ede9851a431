//! Application layer for kinesis-gateway.
//!
//! The application layer decides *what* happens when a UI client connects,
//! sends an event, or goes away.  It delegates *how* a device is driven to
//! the [`kinesis_core::ControlSession`] implementation it is given.
//!
//! # Responsibilities
//!
//! - Owning one control session per UI client (`SessionRegistry`)
//! - Parsing client events and mapping failures onto reply events (`Gateway`)
//! - Defining the `SessionError` and `MessageError` types
//!
//! # What does NOT belong here?
//!
//! - Binding sockets or upgrading HTTP connections (that is infrastructure)
//! - Spawning the external device tool (that is `kinesis-device`)

pub mod gateway;
pub mod session_registry;

pub use gateway::{Gateway, MessageError, SessionEvents};
pub use session_registry::{SessionError, SessionRegistry};
