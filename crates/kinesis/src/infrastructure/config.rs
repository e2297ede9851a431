//! TOML configuration file for the coordinator.
//!
//! Read from the platform-appropriate config file, or from `--config`:
//! - Windows:  `%APPDATA%\Kinesis\config.toml`
//! - Linux:    `~/.config/kinesis/config.toml` (or `$XDG_CONFIG_HOME`)
//! - macOS:    `~/Library/Application Support/Kinesis/config.toml`
//!
//! # Layering
//!
//! ```text
//! built-in defaults  <  config.toml  <  CLI flags / environment variables
//! ```
//!
//! Every field carries a serde default, so a file may set only what it
//! changes:
//!
//! ```toml
//! [tunnel]
//! protocol = "tcp"
//!
//! [gateway]
//! shutdown_grace_secs = 10
//! ```
//!
//! A missing file means "all defaults".  A file that exists but cannot be
//! read or parsed is an error: silently ignoring a typo would run with
//! settings the user did not ask for.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use kinesis_core::{TunnelOptions, TunnelProtocol};
use kinesis_device::ToolConfig;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level coordinator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct KinesisConfig {
    /// `tracing` level used when `RUST_LOG` is not set.
    pub log_level: String,
    pub tunnel: TunnelSection,
    pub gateway: GatewaySection,
    pub tool: ToolSection,
}

/// `[tunnel]`: how the tunnel is requested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TunnelSection {
    pub protocol: TunnelProtocol,
    /// Seconds without traffic before the tunnel closes itself.
    pub max_idle_timeout_secs: u64,
}

/// `[gateway]`: where the gateway listens and how it is stopped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewaySection {
    pub bind_address: IpAddr,
    /// `0` lets the OS pick a free port.
    pub port: u16,
    /// Seconds the gateway gets to release its sessions at shutdown.
    pub shutdown_grace_secs: u64,
    /// Gateway executable.  Defaults to `kinesis-gateway` next to `kinesis`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary: Option<PathBuf>,
}

/// `[tool]`: the external device tool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolSection {
    pub program: PathBuf,
    pub connect_timeout_secs: u64,
    pub settle_millis: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for KinesisConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            tunnel: TunnelSection::default(),
            gateway: GatewaySection::default(),
            tool: ToolSection::default(),
        }
    }
}

impl Default for TunnelSection {
    fn default() -> Self {
        Self {
            protocol: TunnelProtocol::Quic,
            max_idle_timeout_secs: kinesis_core::domain::tunnel::DEFAULT_MAX_IDLE_TIMEOUT.as_secs(),
        }
    }
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: 0,
            shutdown_grace_secs: 5,
            binary: None,
        }
    }
}

impl Default for ToolSection {
    fn default() -> Self {
        let tool = ToolConfig::default();
        Self {
            program: tool.program,
            connect_timeout_secs: tool.connect_timeout.as_secs(),
            settle_millis: u64::try_from(tool.settle.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl KinesisConfig {
    /// Tunnel request settings (no secrets file; that is a CLI-only option).
    pub fn tunnel_options(&self) -> TunnelOptions {
        TunnelOptions {
            protocol: self.tunnel.protocol,
            max_idle_timeout: Duration::from_secs(self.tunnel.max_idle_timeout_secs),
            secrets: None,
        }
    }

    pub fn tool_config(&self) -> ToolConfig {
        ToolConfig {
            program: self.tool.program.clone(),
            connect_timeout: Duration::from_secs(self.tool.connect_timeout_secs),
            settle: Duration::from_millis(self.tool.settle_millis),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.gateway.shutdown_grace_secs)
    }
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

/// Loads the config from `path`, or from the platform default location.
///
/// Without `path`, a platform config directory that cannot be determined
/// (no `HOME`, `XDG_CONFIG_HOME` or `APPDATA`) is treated like a missing
/// file: the defaults are used.
///
/// # Errors
///
/// [`ConfigError::Io`] for file-system errors other than "not found", and
/// [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config(path: Option<&Path>) -> Result<KinesisConfig, ConfigError> {
    match path {
        Some(path) => load_from(path),
        None => load_from_dir(platform_config_dir()),
    }
}

/// Loads `config.toml` from `dir`, or returns defaults when there is no dir.
fn load_from_dir(dir: Option<PathBuf>) -> Result<KinesisConfig, ConfigError> {
    match dir {
        Some(dir) => load_from(&dir.join("config.toml")),
        None => {
            debug!("no platform config directory; using default configuration");
            Ok(KinesisConfig::default())
        }
    }
}

/// Loads the config at `path`, returning defaults if the file does not exist.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_from(path: &Path) -> Result<KinesisConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(KinesisConfig::default()),
        Err(source) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Resolves the platform config base directory including the `Kinesis` subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        // %APPDATA% e.g. C:\Users\<user>\AppData\Roaming
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("Kinesis"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("kinesis"))
    }

    #[cfg(target_os = "macos")]
    {
        // ~/Library/Application Support/Kinesis
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("Kinesis")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        // Fallback for unsupported platforms.
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
