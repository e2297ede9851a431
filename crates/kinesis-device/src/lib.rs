//! kinesis-device: the `pymobiledevice3` adapter.
//!
//! Implements the collaborator traits from `kinesis_core::ports` by driving
//! the external `pymobiledevice3` command line tool as child processes.  The
//! tunnel cryptography and the device automation protocol stay inside that
//! tool; this crate only starts it, reads what it prints, and stops it.
//!
//! ```text
//! DeviceProvider         ── `usbmux list`                       (discovery)
//! TunnelProvider         ── `remote start-tunnel`               (tunnel)
//! ControlSessionFactory  ── TCP to RSD + `developer dvt simulate-location`
//! ```

pub mod discovery;
pub mod location;
pub mod tool;
pub mod tunnel;

pub use discovery::CliDeviceProvider;
pub use location::{CliControlSession, CliControlSessionFactory};
pub use tool::ToolConfig;
pub use tunnel::{CliActiveTunnel, CliTunnelProvider};
