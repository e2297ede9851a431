//! Spawning `kinesis-gateway` as a child process.
//!
//! The coordinator hands the gateway nothing but the tunnel's RSD address,
//! on the command line at spawn time.  The gateway is started with
//! `--watch-stdin` and a piped stdin whose write end only the coordinator
//! holds:
//!
//! - dropping that write end (in [`GatewayProcess::release`], or because
//!   the coordinator died) makes the gateway release its sessions and exit;
//! - stdout and stderr are inherited, so the gateway's `--port <N>` line and
//!   its logs reach the user directly.
//!
//! The child is never killed.  A gateway that is slow to clear its sessions
//! is left running rather than cut off mid-command.

use std::ffi::OsString;
use std::net::IpAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use kinesis_core::RsdAddress;
use kinesis_device::ToolConfig;

use crate::application::{GatewayHandle, GatewayLauncher};

/// File name of the gateway executable.
pub const GATEWAY_BINARY_NAME: &str = "kinesis-gateway";

/// Everything needed to start the gateway apart from the RSD address.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewaySettings {
    pub binary: PathBuf,
    pub bind_address: IpAddr,
    pub port: u16,
    pub tool: ToolConfig,
}

impl GatewaySettings {
    /// Command-line arguments for a gateway serving `rsd`.
    pub fn args(&self, rsd: &RsdAddress) -> Vec<OsString> {
        vec![
            "--rsd-host".into(),
            rsd.host.clone().into(),
            "--rsd-port".into(),
            rsd.port.to_string().into(),
            "--bind".into(),
            self.bind_address.to_string().into(),
            "--port".into(),
            self.port.to_string().into(),
            "--tool".into(),
            self.tool.program.clone().into_os_string(),
            "--connect-timeout".into(),
            self.tool.connect_timeout.as_secs().to_string().into(),
            "--settle-millis".into(),
            self.tool.settle.as_millis().to_string().into(),
            "--watch-stdin".into(),
        ]
    }
}

/// `kinesis-gateway` next to the running executable, or the bare name (looked
/// up on `PATH`) when there is none.
pub fn default_gateway_binary() -> PathBuf {
    let file_name = format!("{GATEWAY_BINARY_NAME}{}", std::env::consts::EXE_SUFFIX);
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(|dir| dir.join(&file_name)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(file_name))
}

// ── Launcher ──────────────────────────────────────────────────────────────────

/// [`GatewayLauncher`] that runs the gateway binary as a child process.
pub struct ProcessGatewayLauncher {
    settings: GatewaySettings,
}

impl ProcessGatewayLauncher {
    pub fn new(settings: GatewaySettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl GatewayLauncher for ProcessGatewayLauncher {
    async fn launch(&self, rsd: &RsdAddress) -> std::io::Result<Box<dyn GatewayHandle>> {
        let args = self.settings.args(rsd);
        debug!("spawning {} {:?}", self.settings.binary.display(), args);

        let mut child = Command::new(&self.settings.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("{}: {e}", self.settings.binary.display()),
                )
            })?;

        let stdin = child.stdin.take();
        info!(
            "gateway started (pid {}) for rsd {rsd}",
            child.id().map_or_else(|| "?".to_string(), |id| id.to_string())
        );
        Ok(Box::new(GatewayProcess { child, stdin }))
    }
}

/// A running gateway child.
pub struct GatewayProcess {
    child: Child,
    /// Write end of the gateway's stdin.  Dropping it is the stop signal.
    stdin: Option<ChildStdin>,
}

#[async_trait]
impl GatewayHandle for GatewayProcess {
    async fn release(&mut self, grace: Duration) -> bool {
        drop(self.stdin.take());

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                if !status.success() {
                    warn!("gateway exited with {status}");
                }
                true
            }
            Ok(Err(e)) => {
                warn!("failed to wait for the gateway: {e}");
                false
            }
            Err(_) => false,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
