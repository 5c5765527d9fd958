//! Per-process I/O pump tasks.
//!
//! Each spawned agent gets exactly one pump task. The pump forwards raw
//! output into the relay's processing queue and, only after stdout and
//! stderr have both reached EOF, waits for the child and reports its exit.
//! The exit notification therefore always trails every output message of
//! the same process.
//!
//! # Cancellation
//!
//! Firing the job's [`CancellationToken`] sends a termination signal to the
//! child (see [`terminate`]); the pump keeps draining output until the
//! process actually exits, so cancellation never bypasses the exit path.

use bytes::{Buf, Bytes, BytesMut};
use futures_util::StreamExt;
use tokio::process::Child;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::orchestrator::job::{ExitStatus, JobId, JobMessage};
use crate::sink::{BufferSink, OutputSink};
use crate::stream::framer::LineFramer;
use crate::stream::spawner::{terminate, AgentProcess};

/// Exit notification for the interactive session's process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionExit {
    /// Generation of the session process that exited.
    pub generation: u64,
    /// How it exited.
    pub status: ExitStatus,
}

/// Spawn the pump for a streaming job.
///
/// Stdout is forwarded as raw chunks (framing happens in the consumer);
/// stderr is framed here and forwarded line by line.
#[must_use]
pub fn spawn_job_pump(
    job_id: JobId,
    process: AgentProcess,
    tx: mpsc::UnboundedSender<JobMessage>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let AgentProcess {
            mut child,
            stdout,
            stderr,
            ..
        } = process;

        let mut stdout = ReaderStream::new(stdout);
        let mut stderr = FramedRead::new(stderr, LineFramer::new());
        let (mut stdout_open, mut stderr_open) = (true, true);
        let mut terminated = false;

        while stdout_open || stderr_open {
            tokio::select! {
                () = cancel.cancelled(), if !terminated => {
                    debug!(%job_id, "job pump: cancellation received, terminating");
                    terminate(&mut child);
                    terminated = true;
                }

                chunk = stdout.next(), if stdout_open => match chunk {
                    Some(Ok(chunk)) => {
                        let _ = tx.send(JobMessage::Stdout { job_id: job_id.clone(), chunk });
                    }
                    Some(Err(err)) => {
                        warn!(%job_id, %err, "job pump: stdout read failed");
                        stdout_open = false;
                    }
                    None => stdout_open = false,
                },

                line = stderr.next(), if stderr_open => match line {
                    Some(Ok(line)) => {
                        let _ = tx.send(JobMessage::Stderr { job_id: job_id.clone(), line });
                    }
                    Some(Err(err)) => {
                        warn!(%job_id, %err, "job pump: stderr read failed");
                        stderr_open = false;
                    }
                    None => stderr_open = false,
                },
            }
        }

        let status = wait_for_exit(&mut child, &cancel, terminated).await;
        debug!(%job_id, code = ?status.code, "job pump: process exited");

        if tx.send(JobMessage::Exited { job_id: job_id.clone(), status }).is_err() {
            debug!(%job_id, "job pump: queue closed before exit could be delivered");
        }
    })
}

/// Spawn the output pump for the interactive session.
///
/// Output from both streams is appended raw to `surface`; the display layer
/// is responsible for interpreting it.
#[must_use]
pub fn spawn_session_pump(
    generation: u64,
    process: AgentProcess,
    surface: BufferSink,
    tx: mpsc::UnboundedSender<SessionExit>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let AgentProcess {
            mut child,
            stdout,
            stderr,
            ..
        } = process;

        let mut stdout = ReaderStream::new(stdout);
        let mut stderr = ReaderStream::new(stderr);
        let (mut stdout_open, mut stderr_open) = (true, true);
        let (mut stdout_carry, mut stderr_carry) = (BytesMut::new(), BytesMut::new());
        let mut terminated = false;

        while stdout_open || stderr_open {
            tokio::select! {
                () = cancel.cancelled(), if !terminated => {
                    terminate(&mut child);
                    terminated = true;
                }

                chunk = stdout.next(), if stdout_open => {
                    stdout_open = forward_raw(chunk, &mut stdout_carry, &surface);
                }

                chunk = stderr.next(), if stderr_open => {
                    stderr_open = forward_raw(chunk, &mut stderr_carry, &surface);
                }
            }
        }

        let status = wait_for_exit(&mut child, &cancel, terminated).await;
        debug!(generation, code = ?status.code, "session pump: process exited");
        let _ = tx.send(SessionExit { generation, status });
    })
}

/// Wait for `child`, still honouring a late cancellation.
async fn wait_for_exit(
    child: &mut Child,
    cancel: &CancellationToken,
    mut terminated: bool,
) -> ExitStatus {
    loop {
        tokio::select! {
            result = child.wait() => {
                return match result {
                    Ok(status) => ExitStatus::from(status),
                    Err(err) => {
                        warn!(%err, "error waiting for agent process");
                        ExitStatus { code: None }
                    }
                };
            }
            () = cancel.cancelled(), if !terminated => {
                terminate(child);
                terminated = true;
            }
        }
    }
}

/// Append a raw chunk to `surface`; returns `false` once the stream is done.
fn forward_raw(
    chunk: Option<std::io::Result<Bytes>>,
    carry: &mut BytesMut,
    surface: &BufferSink,
) -> bool {
    match chunk {
        Some(Ok(chunk)) => {
            carry.extend_from_slice(&chunk);
            let text = take_utf8_prefix(carry);
            if !text.is_empty() {
                surface.append(&text);
            }
            true
        }
        Some(Err(err)) => {
            warn!(%err, "session pump: read failed");
            false
        }
        None => {
            if !carry.is_empty() {
                surface.append(&String::from_utf8_lossy(&carry.split()));
            }
            false
        }
    }
}

/// Remove and return the longest decodable prefix of `buf`.
///
/// An incomplete trailing character stays in `buf` for the next chunk;
/// invalid sequences are replaced.
fn take_utf8_prefix(buf: &mut BytesMut) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(&buf[..]) {
            Ok(text) => {
                out.push_str(text);
                buf.clear();
                return out;
            }
            Err(err) => {
                let valid = err.valid_up_to();
                let head = buf.split_to(valid);
                out.push_str(&String::from_utf8_lossy(&head));
                match err.error_len() {
                    Some(bad) => {
                        buf.advance(bad);
                        out.push(char::REPLACEMENT_CHARACTER);
                    }
                    None => return out,
                }
            }
        }
    }
}
