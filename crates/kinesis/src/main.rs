//! Kinesis coordinator: entry point.
//!
//! Finds a connected iOS device, starts a tunnel to it, prints the tunnel's
//! RSD endpoint and starts `kinesis-gateway` so a browser can set the
//! device's simulated location.  Runs until the tunnel closes or Ctrl+C.
//!
//! # Usage
//!
//! ```text
//! kinesis [OPTIONS]
//!
//! Options:
//!   --udid             <UDID>      Device to use when several are connected
//!   --protocol         <quic|tcp>  Tunnel transport [default: quic]
//!   --max-idle-timeout <SECS>      Tunnel idle timeout [default: 30]
//!   --secrets          <FILE>      Write the tunnel's TLS secrets to FILE
//!   --script-mode                  Print only "<address> <port>"
//!   --config           <FILE>      Config file [default: platform config dir]
//!   --gateway-bin      <PATH>      Gateway executable
//!   --tool             <PATH>      Device tool program
//! ```
//!
//! Creating the tunnel interface usually needs elevated privileges, so this
//! binary is typically run with `sudo`.
//!
//! # Settings precedence
//!
//! ```text
//! built-in defaults  <  config.toml  <  environment variables  <  CLI flags
//! ```
//!
//! | Variable              | Flag            |
//! |-----------------------|-----------------|
//! | `KINESIS_UDID`        | `--udid`        |
//! | `KINESIS_CONFIG`      | `--config`      |
//! | `KINESIS_GATEWAY_BIN` | `--gateway-bin` |
//! | `KINESIS_TOOL`        | `--tool`        |
//!
//! # Exit status
//!
//! `0` when the tunnel closes or the run is interrupted; `1` for every fatal
//! error (no device, unsupported platform, tunnel or gateway failure).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kinesis::application::{Collaborators, LaunchCoordinator, LaunchOptions, LaunchOutcome};
use kinesis::domain::AnnounceStyle;
use kinesis::infrastructure::{
    default_gateway_binary, load_config, GatewaySettings, KinesisConfig, ProcessGatewayLauncher,
    TerminalChooser,
};
use kinesis_core::TunnelProtocol;
use kinesis_device::{CliDeviceProvider, CliTunnelProvider, ToolConfig};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Kinesis coordinator.
///
/// Starts a tunnel to a connected iOS device and launches the
/// location-simulation gateway on top of it.
#[derive(Debug, Parser)]
#[command(
    name = "kinesis",
    about = "Start a device tunnel and the location-simulation gateway",
    version
)]
struct Cli {
    /// UDID of the device to use.  Required when several devices are
    /// connected and stdin is not a terminal.
    #[arg(long, env = "KINESIS_UDID")]
    udid: Option<String>,

    /// Tunnel transport.
    #[arg(long)]
    protocol: Option<TunnelProtocol>,

    /// Seconds without traffic before the tunnel closes itself.
    #[arg(long)]
    max_idle_timeout: Option<u64>,

    /// File the tunnel writes its TLS session secrets to.
    #[arg(long)]
    secrets: Option<PathBuf>,

    /// Print only `<address> <port>` instead of the labelled summary.
    #[arg(long)]
    script_mode: bool,

    /// Config file to read instead of the platform default.
    #[arg(long, env = "KINESIS_CONFIG")]
    config: Option<PathBuf>,

    /// Gateway executable.
    #[arg(long, env = "KINESIS_GATEWAY_BIN")]
    gateway_bin: Option<PathBuf>,

    /// Device tool program (name on PATH or absolute path).
    #[arg(long, env = "KINESIS_TOOL")]
    tool: Option<PathBuf>,
}

impl Cli {
    /// Layers the CLI flags over the config file values.
    fn into_settings(self, file: &KinesisConfig) -> (LaunchOptions, ToolConfig, GatewaySettings) {
        let mut tool = file.tool_config();
        if let Some(program) = self.tool {
            tool.program = program;
        }

        let mut tunnel = file.tunnel_options();
        if let Some(protocol) = self.protocol {
            tunnel.protocol = protocol;
        }
        if let Some(secs) = self.max_idle_timeout {
            tunnel.max_idle_timeout = Duration::from_secs(secs);
        }
        tunnel.secrets = self.secrets;

        let options = LaunchOptions {
            udid: self.udid,
            tunnel,
            style: if self.script_mode {
                AnnounceStyle::Script
            } else {
                AnnounceStyle::Human
            },
            shutdown_grace: file.shutdown_grace(),
        };

        let gateway = GatewaySettings {
            binary: self
                .gateway_bin
                .or_else(|| file.gateway.binary.clone())
                .unwrap_or_else(default_gateway_binary),
            bind_address: file.gateway.bind_address,
            port: file.gateway.port,
            tool: tool.clone(),
        };

        (options, tool, gateway)
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. CLI arguments are parsed and the config file is loaded.
/// 2. `tracing_subscriber` is initialised to write logs to stderr.  The level
///    comes from `RUST_LOG`, or the config file's `log_level`.
/// 3. The [`LaunchCoordinator`] is wired to the real device tool, the
///    gateway process launcher and the terminal prompt, and run until the
///    tunnel closes or Ctrl+C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let file = load_config(cli.config.as_deref()).context("failed to load configuration")?;

    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // stdout is reserved for the connection announcement, so logs go to
    // stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&file.log_level))
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (options, tool, gateway) = cli.into_settings(&file);
    info!(
        "Kinesis starting: protocol={}, tool={}, gateway={}",
        options.tunnel.protocol,
        tool.program_name(),
        gateway.binary.display()
    );
    info!(
        "gateway will listen on {}",
        SocketAddr::new(gateway.bind_address, gateway.port)
    );

    // ── Wire collaborators ────────────────────────────────────────────────────
    let collaborators = Collaborators {
        devices: Arc::new(CliDeviceProvider::new(tool.clone())),
        tunnels: Arc::new(CliTunnelProvider::new(tool)),
        gateway: Arc::new(ProcessGatewayLauncher::new(gateway)),
        chooser: Arc::new(TerminalChooser),
    };

    let mut coordinator =
        LaunchCoordinator::new(collaborators, options, Box::new(std::io::stdout()));

    // ── Run until the tunnel closes or Ctrl+C ─────────────────────────────────
    match coordinator.run(interrupted()).await? {
        LaunchOutcome::TunnelClosed => info!("Kinesis stopped: tunnel closed"),
        LaunchOutcome::Cancelled => info!("Kinesis stopped: interrupted"),
    }
    Ok(())
}

/// Resolves on Ctrl+C.  If the handler cannot be installed it never resolves,
/// so the run only ends when the tunnel does.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for Ctrl+C: {e}");
        std::future::pending::<()>().await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
