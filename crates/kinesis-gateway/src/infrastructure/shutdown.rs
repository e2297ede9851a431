//! Shutdown signals.
//!
//! The gateway stops on Ctrl+C, and (when started by the coordinator with
//! `--watch-stdin`) when its stdin reaches end-of-file.  The coordinator holds
//! the write end of that pipe and never writes to it; when the coordinator
//! exits for any reason, including a crash, the OS closes the pipe and the
//! gateway sees EOF.

use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};

/// Resolves when the process should shut down.
pub async fn shutdown_signal(watch_stdin: bool) {
    let parent_gone = async {
        if watch_stdin {
            wait_for_eof(tokio::io::stdin()).await;
        } else {
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("Ctrl+C received; shutting down gateway"),
                Err(e) => warn!("failed to listen for Ctrl+C: {e}; shutting down gateway"),
            }
        }
        () = parent_gone => info!("stdin closed; parent exited, shutting down gateway"),
    }
}

/// Reads and discards `reader` until it reports end-of-file or an error.
pub async fn wait_for_eof<R>(mut reader: R)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(_) => continue,
            Err(e) => {
                warn!("reading stdin failed: {e}");
                return;
            }
        }
    }
}
