//! Connection announcement printed once the tunnel is up.
//!
//! Two forms are supported:
//!
//! - **Script form**: one line, `<address> <port>`, for callers that capture
//!   stdout (`--script-mode`).
//! - **Human form**: one labelled field per line plus the `--rsd` option to
//!   pass to other device tools.  Labels are coloured when stdout is a
//!   terminal (`colored` honours `NO_COLOR` and `CLICOLOR`).
//!
//! ```text
//! UDID: 00008110-001A2B3C4D5E801E
//! ProductType: iPhone15,2
//! ProductVersion: 17.4.1
//! Interface: utun6
//! Protocol: quic
//! RSD Address: fd7b:e5b:6f53::1
//! RSD Port: 58783
//! Use the following connection option:
//! --rsd fd7b:e5b:6f53::1 58783
//! ```

use std::fmt::Write as _;
use std::path::Path;

use colored::Colorize;
use kinesis_core::{DeviceHandle, TunnelEndpoint};

/// Which announcement form to print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AnnounceStyle {
    Script,
    #[default]
    Human,
}

/// Everything the announcement reports.
#[derive(Debug, Clone, Copy)]
pub struct Announcement<'a> {
    pub device: &'a DeviceHandle,
    pub endpoint: &'a TunnelEndpoint,
    /// TLS secrets file the tunnel writes to, if one was requested.
    pub secrets: Option<&'a Path>,
}

impl Announcement<'_> {
    /// Renders the announcement, including the trailing newline.
    pub fn render(&self, style: AnnounceStyle) -> String {
        match style {
            AnnounceStyle::Script => self.script(),
            AnnounceStyle::Human => self.human(),
        }
    }

    fn script(&self) -> String {
        format!("{} {}\n", self.endpoint.address, self.endpoint.port)
    }

    fn human(&self) -> String {
        let mut out = String::new();
        if let Some(secrets) = self.secrets {
            line(&mut out, "Secrets: ".magenta().bold(), &secrets.display().to_string());
        }
        let label = |name: &str| name.yellow().bold();
        line(&mut out, label("UDID: "), &self.device.udid);
        line(&mut out, label("ProductType: "), &self.device.product_type);
        line(&mut out, label("ProductVersion: "), &self.device.product_version);
        line(&mut out, label("Interface: "), &self.endpoint.interface);
        line(&mut out, label("Protocol: "), self.endpoint.protocol.as_str());
        line(&mut out, label("RSD Address: "), &self.endpoint.address);
        line(&mut out, label("RSD Port: "), &self.endpoint.port.to_string());
        let _ = writeln!(
            out,
            "{}\n{}",
            "Use the following connection option:".yellow().bold(),
            format!("--rsd {} {}", self.endpoint.address, self.endpoint.port)
                .cyan()
                .bold()
        );
        out
    }
}

fn line(out: &mut String, label: colored::ColoredString, value: &str) {
    // Writing to a String cannot fail.
    let _ = writeln!(out, "{label}{}", value.white().bold());
}
