//! Location simulation control sessions.
//!
//! A session owns two things:
//!
//! 1. A TCP connection to the RSD endpoint, opened by
//!    [`CliControlSessionFactory::connect`].  Reaching RSD through the tunnel
//!    is the handshake; the connection is held until the session closes.
//! 2. At most one running `developer dvt simulate-location set` child.  The
//!    tool keeps the simulated position only while its DVT channel is open,
//!    so the child is left running (waiting on its stdin) until the next
//!    command replaces it.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStderr};
use tokio::time::timeout;
use tracing::{debug, warn};

use kinesis_core::{ControlError, ControlSession, ControlSessionFactory, RsdAddress};

use crate::tool::{last_line, strip_ansi, ToolConfig};

/// Arguments for `simulate-location set`.
///
/// The `--` keeps negative coordinates from being read as options.
pub fn set_args(rsd: &RsdAddress, latitude: f64, longitude: f64) -> Vec<String> {
    let mut args = base_args("set", rsd);
    args.push("--".to_string());
    args.push(latitude.to_string());
    args.push(longitude.to_string());
    args
}

/// Arguments for `simulate-location clear`.
pub fn clear_args(rsd: &RsdAddress) -> Vec<String> {
    base_args("clear", rsd)
}

fn base_args(action: &str, rsd: &RsdAddress) -> Vec<String> {
    vec![
        "developer".to_string(),
        "dvt".to_string(),
        "simulate-location".to_string(),
        action.to_string(),
        "--rsd".to_string(),
        rsd.host.clone(),
        rsd.port.to_string(),
    ]
}

/// [`ControlSessionFactory`] backed by the external tool.
#[derive(Debug, Clone, Default)]
pub struct CliControlSessionFactory {
    tool: ToolConfig,
}

impl CliControlSessionFactory {
    pub fn new(tool: ToolConfig) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl ControlSessionFactory for CliControlSessionFactory {
    async fn connect(&self, rsd: &RsdAddress) -> Result<Box<dyn ControlSession>, ControlError> {
        let link = timeout(
            self.tool.connect_timeout,
            TcpStream::connect((rsd.host.as_str(), rsd.port)),
        )
        .await
        .map_err(|_| ControlError::Timeout(self.tool.connect_timeout))?
        .map_err(|source| ControlError::Unreachable {
            addr: rsd.to_string(),
            source,
        })?;

        debug!("control session connected to RSD at {rsd}");

        Ok(Box::new(CliControlSession {
            tool: self.tool.clone(),
            rsd: rsd.clone(),
            link: Some(link),
            active: None,
        }))
    }
}

/// One control session driven through the external tool.
pub struct CliControlSession {
    tool: ToolConfig,
    rsd: RsdAddress,
    link: Option<TcpStream>,
    active: Option<Child>,
}

impl CliControlSession {
    fn ensure_open(&self) -> Result<(), ControlError> {
        if self.link.is_some() {
            Ok(())
        } else {
            Err(ControlError::Closed)
        }
    }

    /// Ends the running `set` child, if any.
    ///
    /// The tool waits for a line on stdin before it exits; send one, then give
    /// it `settle` to finish before killing it.
    async fn stop_active(&mut self) {
        let Some(mut child) = self.active.take() else {
            return;
        };
        if let Some(mut stdin) = child.stdin.take() {
            let _ = stdin.write_all(b"\n").await;
        }
        match timeout(self.tool.settle, child.wait()).await {
            Ok(Ok(status)) => debug!("simulate-location set exited with {status}"),
            Ok(Err(e)) => warn!("waiting for simulate-location set failed: {e}"),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!("failed to stop simulate-location set: {e}");
                }
            }
        }
    }

    /// Runs a one-shot tool command to completion within `connect_timeout`.
    async fn run_once(&self, args: &[String]) -> Result<(), ControlError> {
        let output = timeout(self.tool.connect_timeout, self.tool.command(args).output())
            .await
            .map_err(|_| ControlError::Timeout(self.tool.connect_timeout))?
            .map_err(|source| ControlError::Spawn {
                program: self.tool.program_name(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(ControlError::CommandFailed {
                command: self.tool.describe(args),
                detail: last_line(&String::from_utf8_lossy(&output.stderr)),
            })
        }
    }
}

#[async_trait]
impl ControlSession for CliControlSession {
    async fn set_location(&mut self, latitude: f64, longitude: f64) -> Result<(), ControlError> {
        self.ensure_open()?;
        self.stop_active().await;

        let args = set_args(&self.rsd, latitude, longitude);
        let mut cmd = self.tool.command(&args);
        // The child outlives this call; nothing reads its stdout, and its
        // stderr is drained once it is known to be running.
        cmd.stdin(Stdio::piped()).stdout(Stdio::null());
        let mut child = cmd.spawn().map_err(|source| ControlError::Spawn {
            program: self.tool.program_name(),
            source,
        })?;

        // A child still running after `settle` has applied the position and
        // is holding it; one that already exited tells us how it went.
        // `try_wait` rather than `wait`: the latter closes stdin, which would
        // release the position immediately.
        tokio::time::sleep(self.tool.settle).await;
        match child.try_wait() {
            Ok(None) => {
                if let Some(stderr) = child.stderr.take() {
                    tokio::spawn(log_stderr(stderr));
                }
                self.active = Some(child);
                Ok(())
            }
            Ok(Some(status)) if status.success() => Ok(()),
            Ok(Some(_)) => {
                let mut stderr = String::new();
                if let Some(mut pipe) = child.stderr.take() {
                    let _ = pipe.read_to_string(&mut stderr).await;
                }
                Err(ControlError::CommandFailed {
                    command: self.tool.describe(&args),
                    detail: last_line(&stderr),
                })
            }
            Err(e) => Err(ControlError::Io(e)),
        }
    }

    async fn clear_location(&mut self) -> Result<(), ControlError> {
        self.ensure_open()?;
        self.stop_active().await;
        self.run_once(&clear_args(&self.rsd)).await
    }

    async fn close(&mut self) -> Result<(), ControlError> {
        self.stop_active().await;
        if let Some(mut link) = self.link.take() {
            if let Err(e) = link.shutdown().await {
                debug!("RSD connection shutdown: {e}");
            }
            debug!("control session to {} closed", self.rsd);
        }
        Ok(())
    }
}

/// Logs a running `set` child's stderr until it exits.
async fn log_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!("simulate-location set: {}", strip_ansi(&line));
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
