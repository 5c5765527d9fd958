//! Per-job state for streaming one-shot invocations.

use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::sink::OutputSink;
use crate::stream::framer::LineFramer;

/// Opaque job identifier, unique for the lifetime of a supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(String);

impl JobId {
    /// Build the identifier for the `seq`-th job.
    #[must_use]
    pub fn from_seq(seq: u64) -> Self {
        Self(format!("job-{seq}"))
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Lifecycle position of a registered job.
///
/// `Spawning` and `Removed` are never observed on a registered context:
/// a job enters the registry already streaming and leaves it on removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Output is flowing and no terminal result has been seen.
    Streaming,
    /// A terminal result was rendered; waiting for the process to exit.
    Finalizing,
}

/// I/O notification from a job's pump, processed in arrival order.
#[derive(Debug, Clone)]
pub enum JobMessage {
    /// Raw stdout bytes with no line alignment.
    Stdout {
        /// Job the chunk belongs to.
        job_id: JobId,
        /// The chunk as read.
        chunk: Bytes,
    },
    /// One complete stderr line.
    Stderr {
        /// Job the line belongs to.
        job_id: JobId,
        /// The line without its terminator.
        line: String,
    },
    /// The process exited; always the job's last message.
    Exited {
        /// Job whose process exited.
        job_id: JobId,
        /// How it exited.
        status: ExitStatus,
    },
}

/// How a job's process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    /// Exit code, or `None` when the process was killed by a signal.
    pub code: Option<i32>,
}

impl ExitStatus {
    /// `true` for a zero exit code.
    #[must_use]
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitStatus {
    fn from(status: std::process::ExitStatus) -> Self {
        Self {
            code: status.code(),
        }
    }
}

/// The single finishing message appended when a job's process exits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitSummary {
    /// Non-zero exit without a terminal result.
    Failed {
        /// Exit code; `None` for signal termination.
        code: Option<i32>,
        /// Time from spawn to exit.
        elapsed: Duration,
    },
    /// Clean exit without a terminal result.
    Ended {
        /// Time from spawn to exit.
        elapsed: Duration,
    },
    /// A terminal result was received.
    Finished {
        /// Time from spawn to exit.
        elapsed: Duration,
    },
}

impl ExitSummary {
    /// Choose the summary for `status`, given whether a result was seen.
    #[must_use]
    pub fn classify(status: ExitStatus, has_result: bool, elapsed: Duration) -> Self {
        match (has_result, status.success()) {
            (true, _) => Self::Finished { elapsed },
            (false, true) => Self::Ended { elapsed },
            (false, false) => Self::Failed {
                code: status.code,
                elapsed,
            },
        }
    }
}

impl Display for ExitSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed {
                code: Some(code),
                elapsed,
            } => write!(
                f,
                "[agent failed with exit code {code} after {:.1}s]",
                elapsed.as_secs_f64()
            ),
            Self::Failed {
                code: None,
                elapsed,
            } => write!(
                f,
                "[agent terminated by signal after {:.1}s]",
                elapsed.as_secs_f64()
            ),
            Self::Ended { elapsed } => write!(
                f,
                "[agent ended after {:.1}s without a final result]",
                elapsed.as_secs_f64()
            ),
            Self::Finished { elapsed } => {
                write!(f, "[agent finished in {:.1}s]", elapsed.as_secs_f64())
            }
        }
    }
}

/// State for one active streaming job.
pub struct JobContext {
    /// Identifier assigned at spawn.
    pub id: JobId,
    /// Where the job renders.
    pub sink: Arc<dyn OutputSink>,
    /// Monotonic start time, used for elapsed-time reporting.
    pub started: Instant,
    /// Wall-clock start time, for logs.
    pub started_at: DateTime<Utc>,
    /// OS process id, when known.
    pub pid: Option<u32>,
    /// Holds at most one incomplete stdout line.
    pub framer: LineFramer,
    /// Set once the first decoded event has cleared the placeholder.
    pub seen_first_event: bool,
    /// Terminal result text; written at most once.
    pub final_result: Option<String>,
    /// Whether streamed text left the sink without a trailing newline.
    pub mid_line: bool,
    /// Fires the pump's termination path on cancel.
    pub cancel: CancellationToken,
}

impl JobContext {
    /// Create a context for a freshly spawned process.
    #[must_use]
    pub fn new(
        id: JobId,
        sink: Arc<dyn OutputSink>,
        pid: Option<u32>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            sink,
            started: Instant::now(),
            started_at: Utc::now(),
            pid,
            framer: LineFramer::new(),
            seen_first_event: false,
            final_result: None,
            mid_line: false,
            cancel,
        }
    }

    /// `true` once a terminal result has been processed.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.final_result.is_some()
    }

    /// Current lifecycle position.
    #[must_use]
    pub fn state(&self) -> JobState {
        if self.is_done() {
            JobState::Finalizing
        } else {
            JobState::Streaming
        }
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("id", &self.id)
            .field("started_at", &self.started_at)
            .field("pid", &self.pid)
            .field("seen_first_event", &self.seen_first_event)
            .field("final_result", &self.final_result)
            .finish_non_exhaustive()
    }
}
