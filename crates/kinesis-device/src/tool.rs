//! Shared settings and helpers for invoking the external tool.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;

/// Program name looked up on `PATH` when no explicit path is configured.
pub const DEFAULT_PROGRAM: &str = "pymobiledevice3";

/// How to run the external device tool.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolConfig {
    /// Program name or path of the tool.
    pub program: PathBuf,
    /// Upper bound for connecting to RSD and for one-shot tool commands.
    pub connect_timeout: Duration,
    /// How long a freshly started `simulate-location set` child is watched
    /// for an early failure before it is considered applied.
    pub settle: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from(DEFAULT_PROGRAM),
            connect_timeout: Duration::from_secs(10),
            settle: Duration::from_millis(300),
        }
    }
}

impl ToolConfig {
    /// Resolves the program to an absolute path (searching `PATH` for bare
    /// names).
    pub fn resolve(&self) -> Result<PathBuf, which::Error> {
        which::which(&self.program)
    }

    /// Display name of the program for log and error messages.
    pub fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    /// A command for the tool with `args`, stdin closed and output captured.
    ///
    /// `kill_on_drop` is set so that cancelling the future that owns the
    /// child never leaves the tool running.
    pub(crate) fn command<S: AsRef<str>>(&self, args: &[S]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(args.iter().map(|a| a.as_ref()))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// `"pymobiledevice3 remote start-tunnel ..."`, for messages.
    pub(crate) fn describe<S: AsRef<str>>(&self, args: &[S]) -> String {
        let mut line = self.program_name();
        for arg in args {
            line.push(' ');
            line.push_str(arg.as_ref());
        }
        line
    }
}

/// Removes ANSI SGR colour sequences (`ESC [ ... m`) from `line`.
///
/// The tool colours its labelled summary even when stdout is a pipe.
pub fn strip_ansi(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\u{1b}' && chars.peek() == Some(&'[') {
            chars.next();
            // Skip parameters up to and including the final byte.
            for c in chars.by_ref() {
                if c.is_ascii_alphabetic() {
                    break;
                }
            }
            continue;
        }
        out.push(c);
    }
    out
}

/// Last non-empty line of a tool's stderr, or a placeholder.
pub(crate) fn last_line(stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(strip_ansi)
        .unwrap_or_else(|| "no error output".to_string())
}
