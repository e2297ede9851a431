//! LaunchCoordinator: discovery → tunnel → gateway → shutdown.
//!
//! The coordinator is the top-level state machine of the `kinesis` binary.
//! It owns the tunnel for its whole lifetime and hands the gateway nothing
//! but the tunnel's RSD address.
//!
//! # Walkthrough (for beginners)
//!
//! 1. **Discovering**: ask the [`DeviceProvider`] for connected devices.
//!    Zero devices is fatal; one is picked automatically; several need a
//!    `--udid` or an answer from the [`DeviceChooser`].
//! 2. **TunnelEstablishing**: check that the host can build the requested
//!    tunnel type, then start it.  "Not possible on this platform" is
//!    reported as [`LaunchError::UnsupportedPlatform`] and nothing else runs.
//! 3. **TunnelActive**: print the announcement, start the gateway through the
//!    [`GatewayLauncher`], then wait for the tunnel to close or for the
//!    shutdown future (Ctrl+C) to resolve.
//! 4. **ShuttingDown**: release the gateway and give it `shutdown_grace` to
//!    clear its sessions while the tunnel is still up, then tear the tunnel
//!    down if we are the ones stopping.  The gateway is never killed.
//! 5. **Closed**.
//!
//! An interrupt during steps 1–2 stops immediately with no tunnel or gateway
//! left behind.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use kinesis_core::{
    ActiveTunnel, DeviceHandle, DeviceProvider, ProviderError, RsdAddress, TunnelEndpoint,
    TunnelOptions, TunnelProvider,
};

use crate::domain::{AnnounceStyle, Announcement, LaunchState};

/// How long the gateway gets to exit after its stdin is released.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ── Errors and outcome ────────────────────────────────────────────────────────

/// Fatal coordinator errors.  Every variant ends the process non-zero.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("no device found; connect a device and trust this computer")]
    NoDeviceFound,

    #[error("no connected device has UDID {0}")]
    DeviceNotFound(String),

    #[error("{0} devices connected; pass --udid to choose one")]
    DeviceSelectionRequired(usize),

    #[error("cannot start the tunnel on this platform: {0}")]
    UnsupportedPlatform(String),

    #[error("device discovery failed: {0}")]
    Discovery(#[source] ProviderError),

    #[error("tunnel failed: {0}")]
    Tunnel(#[source] ProviderError),

    #[error("failed to launch the gateway: {0}")]
    Gateway(#[source] std::io::Error),

    #[error("failed to print the connection announcement: {0}")]
    Announce(#[source] std::io::Error),
}

/// How a successful run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchOutcome {
    /// The tunnel closed on its own (peer gone or idle timeout).
    TunnelClosed,
    /// The shutdown future resolved first.
    Cancelled,
}

// ── Collaborator traits ───────────────────────────────────────────────────────

/// Starts the realtime gateway for a tunnel.
#[async_trait]
pub trait GatewayLauncher: Send + Sync {
    async fn launch(&self, rsd: &RsdAddress) -> std::io::Result<Box<dyn GatewayHandle>>;
}

/// A running gateway.
#[async_trait]
pub trait GatewayHandle: Send {
    /// Tells the gateway to stop and waits up to `grace` for it to exit.
    ///
    /// Returns `true` if it exited in time.  A gateway still running after
    /// `grace` is left alone so it can finish releasing its sessions.
    async fn release(&mut self, grace: Duration) -> bool;
}

/// Picks one device out of several.
#[async_trait]
pub trait DeviceChooser: Send + Sync {
    /// Returns the index into `devices` of the chosen device.
    ///
    /// # Errors
    ///
    /// [`LaunchError::DeviceSelectionRequired`] when no choice can be made
    /// (no terminal, or input ended).
    async fn choose(&self, devices: &[DeviceHandle]) -> Result<usize, LaunchError>;
}

/// The coordinator's external collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Arc<dyn DeviceProvider>,
    pub tunnels: Arc<dyn TunnelProvider>,
    pub gateway: Arc<dyn GatewayLauncher>,
    pub chooser: Arc<dyn DeviceChooser>,
}

/// Per-run settings.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchOptions {
    /// Explicit device choice; skips the chooser.
    pub udid: Option<String>,
    pub tunnel: TunnelOptions,
    pub style: AnnounceStyle,
    pub shutdown_grace: Duration,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            udid: None,
            tunnel: TunnelOptions::default(),
            style: AnnounceStyle::Human,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }
}

// ── Device selection ──────────────────────────────────────────────────────────

/// Result of the automatic part of device selection.
#[derive(Debug, PartialEq)]
pub enum Selection {
    Chosen(DeviceHandle),
    /// More than one device and no `--udid`: someone has to choose.
    Ambiguous(Vec<DeviceHandle>),
}

/// Applies the selection rules that need no user input.
///
/// # Errors
///
/// [`LaunchError::NoDeviceFound`] for an empty list, and
/// [`LaunchError::DeviceNotFound`] when `udid` matches none of the devices.
pub fn select_device(
    mut devices: Vec<DeviceHandle>,
    udid: Option<&str>,
) -> Result<Selection, LaunchError> {
    if devices.is_empty() {
        return Err(LaunchError::NoDeviceFound);
    }
    if let Some(udid) = udid {
        return devices
            .into_iter()
            .find(|d| d.udid.eq_ignore_ascii_case(udid))
            .map(Selection::Chosen)
            .ok_or_else(|| LaunchError::DeviceNotFound(udid.to_string()));
    }
    if devices.len() == 1 {
        return Ok(Selection::Chosen(devices.remove(0)));
    }
    Ok(Selection::Ambiguous(devices))
}

// ── LaunchCoordinator ─────────────────────────────────────────────────────────

/// The launch state machine.  Run it once with [`LaunchCoordinator::run`].
pub struct LaunchCoordinator {
    collaborators: Collaborators,
    options: LaunchOptions,
    out: Box<dyn Write + Send + Sync>,
    transitions: Vec<LaunchState>,
}

impl LaunchCoordinator {
    /// `out` receives the connection announcement (stdout in the binary).
    pub fn new(
        collaborators: Collaborators,
        options: LaunchOptions,
        out: Box<dyn Write + Send + Sync>,
    ) -> Self {
        Self {
            collaborators,
            options,
            out,
            transitions: Vec::new(),
        }
    }

    /// The current state, or `None` before `run` starts.
    pub fn state(&self) -> Option<LaunchState> {
        self.transitions.last().copied()
    }

    /// Every state entered so far, in order.
    pub fn transitions(&self) -> &[LaunchState] {
        &self.transitions
    }

    /// Runs the whole launch until the tunnel closes or `shutdown` resolves.
    ///
    /// # Errors
    ///
    /// Any [`LaunchError`]; the coordinator is `Closed` afterwards and has
    /// released whatever it acquired.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<LaunchOutcome, LaunchError>
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let result = self.drive(&mut shutdown).await;
        self.enter(LaunchState::Closed);
        if let Err(e) = &result {
            debug!("launch failed: {e}");
        }
        result
    }

    async fn drive<F>(&mut self, shutdown: &mut std::pin::Pin<&mut F>) -> Result<LaunchOutcome, LaunchError>
    where
        F: Future<Output = ()> + Send,
    {
        // ── Discovering ───────────────────────────────────────────────────────
        self.enter(LaunchState::Discovering);
        let device = tokio::select! {
            device = self.discover() => device?,
            () = shutdown.as_mut() => return Ok(LaunchOutcome::Cancelled),
        };
        info!("selected device {device}");

        // ── TunnelEstablishing ────────────────────────────────────────────────
        self.enter(LaunchState::TunnelEstablishing);
        let mut tunnel = tokio::select! {
            tunnel = self.establish(&device) => tunnel?,
            () = shutdown.as_mut() => return Ok(LaunchOutcome::Cancelled),
        };
        let endpoint = tunnel.endpoint().clone();
        info!(
            "tunnel created: {} via {} ({})",
            endpoint.rsd(),
            endpoint.interface,
            endpoint.protocol
        );

        // ── TunnelActive ──────────────────────────────────────────────────────
        self.enter(LaunchState::TunnelActive);
        if let Err(e) = self.announce(&device, &endpoint) {
            close_tunnel(&mut tunnel).await;
            return Err(e);
        }
        let mut gateway = match self.collaborators.gateway.launch(&endpoint.rsd()).await {
            Ok(gateway) => gateway,
            Err(e) => {
                close_tunnel(&mut tunnel).await;
                return Err(LaunchError::Gateway(e));
            }
        };

        let (outcome, wait_error) = tokio::select! {
            closed = tunnel.wait_closed() => {
                info!("tunnel was closed");
                (LaunchOutcome::TunnelClosed, closed.err())
            }
            () = shutdown.as_mut() => {
                info!("interrupted; closing tunnel");
                (LaunchOutcome::Cancelled, None)
            }
        };

        // ── ShuttingDown ──────────────────────────────────────────────────────
        //
        // The gateway clears every session through the tunnel, so it is
        // released while the tunnel is still up.
        self.enter(LaunchState::ShuttingDown);
        if gateway.release(self.options.shutdown_grace).await {
            info!("gateway exited");
        } else {
            warn!(
                "gateway still running after {:?}; leaving it to finish",
                self.options.shutdown_grace
            );
        }
        if outcome == LaunchOutcome::Cancelled {
            close_tunnel(&mut tunnel).await;
        }

        match wait_error {
            Some(e) => Err(LaunchError::Tunnel(e)),
            None => Ok(outcome),
        }
    }

    fn enter(&mut self, state: LaunchState) {
        if self.state() != Some(state) {
            debug!("launch state: {state}");
            self.transitions.push(state);
        }
    }

    async fn discover(&self) -> Result<DeviceHandle, LaunchError> {
        let devices = self
            .collaborators
            .devices
            .list_devices()
            .await
            .map_err(LaunchError::Discovery)?;
        debug!("{} device(s) connected", devices.len());

        match select_device(devices, self.options.udid.as_deref())? {
            Selection::Chosen(device) => Ok(device),
            Selection::Ambiguous(mut devices) => {
                let index = self.collaborators.chooser.choose(&devices).await?;
                if index >= devices.len() {
                    return Err(LaunchError::DeviceSelectionRequired(devices.len()));
                }
                Ok(devices.swap_remove(index))
            }
        }
    }

    async fn establish(&self, device: &DeviceHandle) -> Result<Box<dyn ActiveTunnel>, LaunchError> {
        let tunnels = &self.collaborators.tunnels;
        let protocol = self.options.tunnel.protocol;

        tunnels
            .check_support(protocol)
            .await
            .map_err(tunnel_error)?;
        tunnels
            .start_tunnel(device, &self.options.tunnel)
            .await
            .map_err(tunnel_error)
    }

    fn announce(&mut self, device: &DeviceHandle, endpoint: &TunnelEndpoint) -> Result<(), LaunchError> {
        let announcement = Announcement {
            device,
            endpoint,
            secrets: self.options.tunnel.secrets.as_deref(),
        };
        let text = announcement.render(self.options.style);
        self.out
            .write_all(text.as_bytes())
            .and_then(|()| self.out.flush())
            .map_err(LaunchError::Announce)
    }
}

fn tunnel_error(e: ProviderError) -> LaunchError {
    match e {
        ProviderError::Unsupported(reason) => LaunchError::UnsupportedPlatform(reason),
        other => LaunchError::Tunnel(other),
    }
}

async fn close_tunnel(tunnel: &mut Box<dyn ActiveTunnel>) {
    if let Err(e) = tunnel.close().await {
        warn!("failed to close tunnel: {e}");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
