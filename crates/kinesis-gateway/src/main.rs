//! Kinesis realtime gateway: entry point.
//!
//! This binary serves the location-simulation web UI and turns every
//! connected browser into a device control session reached through the RSD
//! endpoint of an already-running tunnel.
//!
//! # Why a separate gateway process?
//!
//! The tunnel coordinator (`kinesis`) needs elevated privileges to create the
//! tunnel interface; the gateway does not.  Keeping the web-facing code in its
//! own process means the part that talks to browsers never runs with more
//! rights than it needs, and the only thing handed across is the RSD address.
//!
//! # Usage
//!
//! ```text
//! kinesis-gateway --rsd-host <HOST> --rsd-port <PORT> [OPTIONS]
//!
//! Options:
//!   --bind            <IP>    Address to listen on [default: 127.0.0.1]
//!   --port            <PORT>  Port to listen on, 0 = any free port [default: 0]
//!   --tool            <PATH>  Device tool program [default: pymobiledevice3]
//!   --connect-timeout <SECS>  RSD connect timeout [default: 10]
//!   --settle-millis   <MS>    Wait after a set command before reporting [default: 300]
//!   --watch-stdin             Exit when stdin reaches end-of-file
//! ```
//!
//! Once bound, the gateway prints `--port <N>` on stdout.  Logs go to stderr.
//!
//! # Environment variable overrides
//!
//! | Variable           | Default            | Description                 |
//! |--------------------|--------------------|-----------------------------|
//! | `KINESIS_RSD_HOST` | (required)         | RSD address on the tunnel   |
//! | `KINESIS_RSD_PORT` | (required)         | RSD port on the tunnel      |
//! | `KINESIS_BIND`     | `127.0.0.1`        | Listen address              |
//! | `KINESIS_PORT`     | `0`                | Listen port                 |
//! | `KINESIS_TOOL`     | `pymobiledevice3`  | Device tool program         |
//!
//! # Architecture overview
//!
//! ```text
//! Web Browser  (JSON over WebSocket, /ws)
//!       ↕
//! kinesis-gateway  ← this process
//!   domain/          ClientId, JSON events, GatewayConfig
//!   application/     SessionRegistry, Gateway (connect/message/disconnect)
//!   infrastructure/
//!     ws_server/     axum routes, per-client tasks
//!     shutdown/      Ctrl+C, stdin EOF
//!       ↕
//! iOS device  (RSD over the tunnel, via kinesis-device)
//! ```

use std::io::Write;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kinesis_core::RsdAddress;
use kinesis_device::{CliControlSessionFactory, ToolConfig};
use kinesis_gateway::domain::GatewayConfig;
use kinesis_gateway::infrastructure::{shutdown_signal, GatewayServer};

// ── CLI argument definitions ──────────────────────────────────────────────────

/// Kinesis realtime gateway.
///
/// Serves the location-simulation UI and binds each browser to a device
/// control session.
#[derive(Debug, Parser)]
#[command(
    name = "kinesis-gateway",
    about = "Realtime gateway binding browser clients to device location sessions",
    version
)]
struct Cli {
    /// RSD address announced by the tunnel (usually an IPv6 address).
    #[arg(long, env = "KINESIS_RSD_HOST")]
    rsd_host: String,

    /// RSD port announced by the tunnel.
    #[arg(long, env = "KINESIS_RSD_PORT")]
    rsd_port: u16,

    /// IP address to bind the HTTP/WebSocket server to.
    ///
    /// The UI has no authentication; keep the loopback default unless the
    /// network is trusted.
    #[arg(long, default_value = "127.0.0.1", env = "KINESIS_BIND")]
    bind: String,

    /// TCP port to listen on.  `0` lets the OS pick a free port.
    #[arg(long, default_value_t = 0, env = "KINESIS_PORT")]
    port: u16,

    /// Device tool program (name on PATH or absolute path).
    #[arg(long, default_value = kinesis_device::tool::DEFAULT_PROGRAM, env = "KINESIS_TOOL")]
    tool: PathBuf,

    /// Seconds to wait when opening a control session or running a command.
    #[arg(long, default_value_t = 10)]
    connect_timeout: u64,

    /// Milliseconds a `set` command is given to fail before it is reported
    /// as applied.
    #[arg(long, default_value_t = 300)]
    settle_millis: u64,

    /// Exit when stdin reaches end-of-file (set by the coordinator).
    #[arg(long)]
    watch_stdin: bool,
}

impl Cli {
    /// Converts the parsed CLI arguments into gateway and tool settings.
    ///
    /// # Errors
    ///
    /// Returns an error if `--bind` is not a valid IP address.
    fn into_configs(self) -> anyhow::Result<(GatewayConfig, ToolConfig)> {
        let ip: IpAddr = self
            .bind
            .parse()
            .with_context(|| format!("invalid bind address: '{}'", self.bind))?;

        let gateway = GatewayConfig {
            bind_addr: SocketAddr::new(ip, self.port),
            rsd: RsdAddress::new(self.rsd_host, self.rsd_port),
            watch_stdin: self.watch_stdin,
        };
        let tool = ToolConfig {
            program: self.tool,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            settle: Duration::from_millis(self.settle_millis),
        };
        Ok((gateway, tool))
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

/// Program entry point.
///
/// # What happens at startup
///
/// 1. `tracing_subscriber` is initialised to write logs to stderr.  The level
///    is controlled by `RUST_LOG` (default `info`).
/// 2. CLI arguments are parsed into [`GatewayConfig`] and [`ToolConfig`].
/// 3. The listener is bound and `--port <N>` is printed on stdout, so the
///    coordinator (or a person) knows where to point the browser.
/// 4. The server runs until Ctrl+C or, with `--watch-stdin`, until the parent
///    process goes away.  Every open control session is then cleared and
///    closed.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging setup ─────────────────────────────────────────────────────────
    //
    // stdout is reserved for the `--port` line, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // ── Parse CLI arguments ───────────────────────────────────────────────────
    let cli = Cli::parse();
    let (config, tool) = cli.into_configs()?;

    info!(
        "Kinesis gateway starting: rsd={}, tool={}",
        config.rsd,
        tool.program_name()
    );

    // ── Bind and announce the port ────────────────────────────────────────────
    let factory = Arc::new(CliControlSessionFactory::new(tool));
    let server = GatewayServer::bind(&config, factory).await?;
    let addr = server.local_addr()?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "--port {}", addr.port()).context("failed to write port to stdout")?;
    stdout.flush().context("failed to flush stdout")?;
    drop(stdout);

    // ── Serve until shutdown ──────────────────────────────────────────────────
    server.serve(shutdown_signal(config.watch_stdin)).await?;

    info!("Kinesis gateway stopped");
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
