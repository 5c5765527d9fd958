//! Session input writer task.
//!
//! Receives text from a tokio [`mpsc`] channel and writes each message to
//! the interactive agent's `stdin`, terminated by a `\n` byte.

use tokio::io::AsyncWriteExt;
use tokio::process::ChildStdin;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Forward queued text to the agent's `stdin`.
///
/// The task exits cleanly when:
/// - `cancel` is triggered (session teardown), or
/// - `text_rx` is closed (all senders dropped).
///
/// # Errors
///
/// Returns [`AppError::Io`]`("write failed: …")` if writing to `stdin`
/// fails (e.g. the agent process has exited).
pub async fn run_writer(
    generation: u64,
    mut stdin: ChildStdin,
    mut text_rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(generation, "session writer: cancellation received, stopping");
                break;
            }

            text = text_rx.recv() => {
                let Some(text) = text else {
                    debug!(generation, "session writer: input channel closed, stopping");
                    break;
                };

                let mut bytes = text.into_bytes();
                bytes.push(b'\n');

                stdin.write_all(&bytes).await.map_err(|e| {
                    warn!(generation, error = %e, "session writer: write to stdin failed");
                    AppError::Io(format!("write failed: {e}"))
                })?;
                stdin.flush().await.map_err(|e| AppError::Io(format!("flush failed: {e}")))?;
            }
        }
    }

    Ok(())
}
