//! Interactive device prompt.
//!
//! Used only when several devices are connected and no `--udid` was given.
//! The list and the question go to stderr; stdout is reserved for the
//! connection announcement.
//!
//! ```text
//! Several devices are connected:
//!   1) iPhone15,2 17.4.1 (00008110-001A2B3C4D5E801E)
//!   2) iPad13,4 17.2 (00008103-000C1D2E3F40002E)
//! Choose a device [1-2]:
//! ```

use std::io::{BufRead, IsTerminal, Write};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use kinesis_core::DeviceHandle;

use crate::application::{DeviceChooser, LaunchError};

/// Asks on the terminal.  Refuses (with `DeviceSelectionRequired`) when stdin
/// is not a terminal, so scripts never hang on a question.
#[derive(Debug, Default)]
pub struct TerminalChooser;

#[async_trait]
impl DeviceChooser for TerminalChooser {
    async fn choose(&self, devices: &[DeviceHandle]) -> Result<usize, LaunchError> {
        if !std::io::stdin().is_terminal() {
            return Err(LaunchError::DeviceSelectionRequired(devices.len()));
        }
        let answers = stdin_lines().map_err(|e| {
            debug!("cannot start stdin reader: {e}");
            LaunchError::DeviceSelectionRequired(devices.len())
        })?;
        ask(devices, answers, std::io::stderr()).await
    }
}

/// Reads stdin lines on a detached thread.
///
/// A blocking stdin read cannot be cancelled.  On tokio's blocking pool it
/// would keep the runtime from shutting down after Ctrl+C until Enter is
/// pressed, so the read runs on its own thread, which the process abandons
/// when `main` returns.  The thread ends at end of input, on a read error,
/// or at the first line read after the receiver is gone.
fn stdin_lines() -> std::io::Result<mpsc::UnboundedReceiver<String>> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("kinesis-stdin".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.send(line).is_err() {
                    break;
                }
            }
            debug!("stdin reader finished");
        })?;
    Ok(rx)
}

/// Prints the numbered list and takes answers until one is valid.
///
/// Dropping the returned future (on Ctrl+C) stops waiting at once.
///
/// # Errors
///
/// [`LaunchError::DeviceSelectionRequired`] if the answers end before a
/// valid one.
pub async fn ask<W>(
    devices: &[DeviceHandle],
    mut answers: mpsc::UnboundedReceiver<String>,
    mut output: W,
) -> Result<usize, LaunchError>
where
    W: Write,
{
    // The prompt is best effort; a closed stderr must not stop the answer
    // from being read.
    let _ = writeln!(output, "Several devices are connected:");
    for (n, device) in devices.iter().enumerate() {
        let _ = writeln!(output, "  {}) {device}", n + 1);
    }

    loop {
        let _ = write!(output, "Choose a device [1-{}]: ", devices.len());
        let _ = output.flush();

        let Some(line) = answers.recv().await else {
            return Err(LaunchError::DeviceSelectionRequired(devices.len()));
        };
        match parse_choice(&line, devices.len()) {
            Some(index) => return Ok(index),
            None => {
                let _ = writeln!(output, "Please enter a number between 1 and {}.", devices.len());
            }
        }
    }
}

/// Parses a 1-based answer into a 0-based index, or `None` when out of range.
pub fn parse_choice(input: &str, count: usize) -> Option<usize> {
    let n: usize = input.trim().parse().ok()?;
    (1..=count).contains(&n).then(|| n - 1)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
