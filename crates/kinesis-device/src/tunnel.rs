//! Tunnel lifecycle through `pymobiledevice3 remote start-tunnel`.
//!
//! The tool establishes the tunnel, prints where RSD can be reached and then
//! keeps running for as long as the tunnel is up.  So:
//!
//! - the endpoint comes from the tool's stdout (labelled summary or the
//!   single `<address> <port>` script-mode line),
//! - the child exiting is the tunnel's close signal, and
//! - killing the child tears the tunnel down.

use std::collections::VecDeque;
use std::process::ExitStatus;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use kinesis_core::{
    ActiveTunnel, DeviceHandle, ProviderError, TunnelEndpoint, TunnelOptions, TunnelProtocol,
    TunnelProvider,
};

use crate::tool::{last_line, strip_ansi, ToolConfig};

/// Markers in the tool's error output meaning "this host cannot do that".
/// Stderr lines kept for error details.  A tunnel runs for hours, so only
/// the most recent lines are held.
const STDERR_TAIL_LINES: usize = 20;

const UNSUPPORTED_MARKERS: &[&str] = &[
    "NotImplementedError",
    "failed to start the QUIC tunnel",
    "not supported on this platform",
];

/// [`TunnelProvider`] backed by the external tool.
#[derive(Debug, Clone, Default)]
pub struct CliTunnelProvider {
    tool: ToolConfig,
}

impl CliTunnelProvider {
    pub fn new(tool: ToolConfig) -> Self {
        Self { tool }
    }
}

/// Builds the argument list for `remote start-tunnel`.
pub fn start_tunnel_args(device: &DeviceHandle, options: &TunnelOptions) -> Vec<String> {
    let mut args = vec![
        "remote".to_string(),
        "start-tunnel".to_string(),
        "--udid".to_string(),
        device.udid.clone(),
        "--protocol".to_string(),
        options.protocol.as_str().to_string(),
        "--max-idle-timeout".to_string(),
        options.max_idle_timeout.as_secs_f64().to_string(),
    ];
    if let Some(secrets) = &options.secrets {
        args.push("--secrets".to_string());
        args.push(secrets.display().to_string());
    }
    args
}

#[async_trait]
impl TunnelProvider for CliTunnelProvider {
    async fn check_support(&self, protocol: TunnelProtocol) -> Result<(), ProviderError> {
        match self.tool.resolve() {
            Ok(path) => {
                debug!("{protocol} tunnels provided by {}", path.display());
                Ok(())
            }
            Err(e) => Err(ProviderError::Unsupported(format!(
                "cannot start a {protocol} tunnel: '{}' is not available ({e})",
                self.tool.program_name()
            ))),
        }
    }

    async fn start_tunnel(
        &self,
        device: &DeviceHandle,
        options: &TunnelOptions,
    ) -> Result<Box<dyn ActiveTunnel>, ProviderError> {
        let args = start_tunnel_args(device, options);
        info!("starting {} tunnel to {}", options.protocol, device.udid);

        let mut child = self
            .tool
            .command(&args)
            .spawn()
            .map_err(|source| ProviderError::Spawn {
                program: self.tool.program_name(),
                source,
            })?;

        // Drain stderr concurrently so the tool never blocks on a full pipe.
        let stderr_task = child.stderr.take().map(drain_stderr);

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProviderError::UnexpectedOutput("tool stdout not captured".into()))?;
        let mut lines = BufReader::new(stdout).lines();

        let mut summary = TunnelSummary::new(options.protocol);
        let endpoint = loop {
            match lines.next_line().await? {
                Some(line) => {
                    debug!("tunnel: {}", strip_ansi(&line));
                    if let Some(endpoint) = summary.feed(&line) {
                        break endpoint;
                    }
                }
                None => {
                    // The tool exited (or closed stdout) before announcing.
                    let status = child.wait().await?;
                    let stderr = match stderr_task {
                        Some(task) => task.await.unwrap_or_default(),
                        None => String::new(),
                    };
                    return Err(classify_early_exit(
                        self.tool.describe(&args),
                        status,
                        &stderr,
                    ));
                }
            }
        };

        // Keep reading stdout so the tool never blocks writing to it.
        let stdout_task = tokio::spawn(async move {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("tunnel: {}", strip_ansi(&line));
            }
        });

        info!(
            "tunnel up: rsd {} port {} via {}",
            endpoint.address, endpoint.port, endpoint.interface
        );

        Ok(Box::new(CliActiveTunnel {
            endpoint,
            child,
            closed: false,
            stdout_task,
            stderr_task,
        }))
    }
}

/// A running `start-tunnel` child process.
pub struct CliActiveTunnel {
    endpoint: TunnelEndpoint,
    child: Child,
    closed: bool,
    stdout_task: JoinHandle<()>,
    stderr_task: Option<JoinHandle<String>>,
}

#[async_trait]
impl ActiveTunnel for CliActiveTunnel {
    fn endpoint(&self) -> &TunnelEndpoint {
        &self.endpoint
    }

    async fn wait_closed(&mut self) -> Result<(), ProviderError> {
        let status = self.child.wait().await?;
        self.closed = true;
        if status.success() {
            info!("tunnel process exited");
        } else {
            let stderr = match self.stderr_task.take() {
                Some(task) => task.await.unwrap_or_default(),
                None => String::new(),
            };
            warn!("tunnel process exited with {status}: {}", last_line(&stderr));
        }
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ProviderError> {
        if self.closed {
            return Ok(());
        }
        if self.child.try_wait()?.is_none() {
            info!("closing tunnel");
            self.child.kill().await?;
        }
        self.closed = true;
        Ok(())
    }
}

impl Drop for CliActiveTunnel {
    fn drop(&mut self) {
        self.stdout_task.abort();
    }
}

/// Keeps the last [`STDERR_TAIL_LINES`] lines of a child's stderr, logging
/// each line at debug level.
fn drain_stderr<R>(stderr: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("tunnel stderr: {}", strip_ansi(&line));
            if tail.len() == STDERR_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
        tail.into_iter().fold(String::new(), |mut collected, line| {
            collected.push_str(&line);
            collected.push('\n');
            collected
        })
    })
}

fn classify_early_exit(command: String, status: ExitStatus, stderr: &str) -> ProviderError {
    if UNSUPPORTED_MARKERS.iter().any(|m| stderr.contains(m)) {
        return ProviderError::Unsupported(last_line(stderr));
    }
    ProviderError::ToolFailed {
        command,
        status: status.to_string(),
        detail: last_line(stderr),
    }
}

// ── Summary parsing ───────────────────────────────────────────────────────────

/// Incremental parser for the tool's tunnel announcement.
///
/// Understands both forms the tool can print:
///
/// ```text
/// Interface: utun6            (labelled form, one field per line)
/// Protocol: TunnelProtocol.QUIC
/// RSD Address: fd7b:e5b:6f53::1
/// RSD Port: 58783
///
/// fd7b:e5b:6f53::1 58783      (script form)
/// ```
#[derive(Debug, Clone)]
pub struct TunnelSummary {
    requested: TunnelProtocol,
    interface: Option<String>,
    protocol: Option<TunnelProtocol>,
    address: Option<String>,
    port: Option<u16>,
}

impl TunnelSummary {
    pub fn new(requested: TunnelProtocol) -> Self {
        Self {
            requested,
            interface: None,
            protocol: None,
            address: None,
            port: None,
        }
    }

    /// Feeds one output line; returns the endpoint once it is complete.
    pub fn feed(&mut self, raw: &str) -> Option<TunnelEndpoint> {
        let line = strip_ansi(raw);
        let line = line.trim();

        if let Some((label, value)) = line.split_once(':') {
            let value = value.trim();
            match label.trim() {
                "Interface" => self.interface = Some(value.to_string()),
                "Protocol" => self.protocol = value.parse().ok(),
                "RSD Address" => self.address = Some(value.to_string()),
                "RSD Port" => self.port = value.parse().ok(),
                _ => {}
            }
        }

        // Script form: exactly two whitespace-separated fields, the second a
        // port number.  IPv6 addresses contain ':' so a labelled line is told
        // apart by its first token ending in ':'.
        if self.address.is_none() {
            let mut parts = line.split_whitespace();
            if let (Some(addr), Some(port), None) = (parts.next(), parts.next(), parts.next()) {
                if addr.ends_with(':') {
                    return None;
                }
                if let Ok(port) = port.parse::<u16>() {
                    self.address = Some(addr.to_string());
                    self.port = Some(port);
                }
            }
        }

        match (&self.address, self.port) {
            (Some(address), Some(port)) => Some(TunnelEndpoint {
                address: address.clone(),
                port,
                protocol: self.protocol.unwrap_or(self.requested),
                interface: self.interface.clone().unwrap_or_default(),
            }),
            _ => None,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
