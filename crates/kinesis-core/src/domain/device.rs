//! Device handle: identity and metadata of one connected device.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A connected device as reported by the device provider.
///
/// The handle is read-only and lives for one CLI invocation.  Only `udid` is
/// required to address the device; the remaining fields are informational and
/// end up in the human-readable connection summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceHandle {
    /// Unique device identifier (UDID).
    pub udid: String,
    /// Hardware model, e.g. `iPhone15,2`.
    pub product_type: String,
    /// OS version, e.g. `17.4.1`.
    pub product_version: String,
    /// User-visible device name, when the provider reports one.
    pub name: Option<String>,
    /// How the device is attached (`USB`, `Network`, ...).
    pub connection: Option<String>,
}

impl DeviceHandle {
    /// Creates a handle with only the mandatory identity fields filled in.
    pub fn new(
        udid: impl Into<String>,
        product_type: impl Into<String>,
        product_version: impl Into<String>,
    ) -> Self {
        Self {
            udid: udid.into(),
            product_type: product_type.into(),
            product_version: product_version.into(),
            name: None,
            connection: None,
        }
    }
}

impl fmt::Display for DeviceHandle {
    /// One-line label used by the interactive device prompt.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(
                f,
                "{name} ({} {}, {})",
                self.product_type, self.product_version, self.udid
            ),
            None => write!(
                f,
                "{} {} ({})",
                self.product_type, self.product_version, self.udid
            ),
        }
    }
}
