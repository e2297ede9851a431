//! Device discovery through `pymobiledevice3 usbmux list`.
//!
//! The tool prints a JSON array with one object per attached device.  A
//! device reachable both over USB and over the network appears twice; the
//! first entry wins so USB is preferred.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use kinesis_core::{DeviceHandle, DeviceProvider, ProviderError};

use crate::tool::{last_line, ToolConfig};

/// [`DeviceProvider`] backed by the external tool.
#[derive(Debug, Clone, Default)]
pub struct CliDeviceProvider {
    tool: ToolConfig,
}

impl CliDeviceProvider {
    pub fn new(tool: ToolConfig) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl DeviceProvider for CliDeviceProvider {
    async fn list_devices(&self) -> Result<Vec<DeviceHandle>, ProviderError> {
        let args = ["usbmux", "list"];
        let output = self
            .tool
            .command(&args)
            .output()
            .await
            .map_err(|source| ProviderError::Spawn {
                program: self.tool.program_name(),
                source,
            })?;

        if !output.status.success() {
            return Err(ProviderError::ToolFailed {
                command: self.tool.describe(&args),
                status: output.status.to_string(),
                detail: last_line(&String::from_utf8_lossy(&output.stderr)),
            });
        }

        let devices = parse_device_list(&String::from_utf8_lossy(&output.stdout))?;
        debug!("device provider reported {} device(s)", devices.len());
        Ok(devices)
    }
}

/// One entry of the tool's JSON device list.  Unknown keys are ignored.
#[derive(Debug, Deserialize)]
struct UsbmuxEntry {
    #[serde(rename = "UniqueDeviceID", default)]
    unique_device_id: Option<String>,
    #[serde(rename = "Identifier", default)]
    identifier: Option<String>,
    #[serde(rename = "ProductType", default)]
    product_type: String,
    #[serde(rename = "ProductVersion", default)]
    product_version: String,
    #[serde(rename = "DeviceName", default)]
    device_name: Option<String>,
    #[serde(rename = "ConnectionType", default)]
    connection_type: Option<String>,
}

/// Parses the JSON printed by `usbmux list` into device handles.
///
/// Entries without any identifier are skipped; duplicate UDIDs keep the first
/// occurrence.
///
/// # Errors
///
/// [`ProviderError::UnexpectedOutput`] if the text is not a JSON array of
/// objects.
pub fn parse_device_list(json: &str) -> Result<Vec<DeviceHandle>, ProviderError> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let entries: Vec<UsbmuxEntry> = serde_json::from_str(trimmed)
        .map_err(|e| ProviderError::UnexpectedOutput(format!("device list is not valid JSON: {e}")))?;

    let mut devices: Vec<DeviceHandle> = Vec::with_capacity(entries.len());
    for entry in entries {
        let Some(udid) = entry.unique_device_id.or(entry.identifier) else {
            continue;
        };
        if devices.iter().any(|d| d.udid == udid) {
            continue;
        }
        devices.push(DeviceHandle {
            udid,
            product_type: entry.product_type,
            product_version: entry.product_version,
            name: entry.device_name,
            connection: entry.connection_type,
        });
    }
    Ok(devices)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
