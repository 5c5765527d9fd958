//! Job registry and streaming one-shot supervisor.
//!
//! The [`Supervisor`] owns every active [`JobContext`], keyed by [`JobId`].
//! Each job's pump task feeds [`JobMessage`]s into one shared queue; the
//! supervisor consumes that queue one message at a time, so all job state
//! is mutated from a single place and never concurrently.
//!
//! # Job lifecycle
//!
//! 1. [`Supervisor::start_streaming_job`] spawns the agent and registers the
//!    context (a spawn failure is rendered into the sink and never
//!    registered).
//! 2. Stdout chunks are framed into lines, decoded, and rendered; stderr
//!    lines are appended with the configured marker.
//! 3. The exit message flushes the residual partial line, appends exactly
//!    one summary, and removes the job. This is the only removal path.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::config::{OutputFormat, RelayConfig};
use crate::orchestrator::job::{ExitStatus, ExitSummary, JobContext, JobId, JobMessage};
use crate::sink::{OutputSink, SinkFactory};
use crate::stream::decoder::{decode_line, DecodedEvent};
use crate::stream::pump::spawn_job_pump;
use crate::stream::spawner::{spawn_one_shot, AgentCommand};
use crate::Result;

/// Result of a cancel request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelOutcome {
    /// A termination signal was requested for the job's process.
    Signalled(JobId),
    /// No such job is registered; nothing was done.
    UnknownJob(JobId),
}

impl CancelOutcome {
    /// Warning text for an unknown job, `None` when the cancel went through.
    #[must_use]
    pub fn warning(&self) -> Option<String> {
        match self {
            Self::Signalled(_) => None,
            Self::UnknownJob(id) => Some(format!("no running job `{id}`")),
        }
    }
}

impl Display for CancelOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Signalled(id) => write!(f, "cancel requested for `{id}`"),
            Self::UnknownJob(id) => write!(f, "no running job `{id}`"),
        }
    }
}

/// Registry and state machine for concurrent streaming jobs.
pub struct Supervisor {
    config: Arc<RelayConfig>,
    agent: AgentCommand,
    sinks: Arc<dyn SinkFactory>,
    jobs: HashMap<JobId, JobContext>,
    next_seq: u64,
    tx: mpsc::UnboundedSender<JobMessage>,
    rx: mpsc::UnboundedReceiver<JobMessage>,
}

impl Supervisor {
    /// Create a supervisor with an empty registry.
    #[must_use]
    pub fn new(config: Arc<RelayConfig>, sinks: Arc<dyn SinkFactory>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            agent: AgentCommand::from_config(&config),
            config,
            sinks,
            jobs: HashMap::new(),
            next_seq: 1,
            tx,
            rx,
        }
    }

    /// Spawn a streaming job for `prompt` and register it.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// - `AppError::Unavailable` if the agent binary cannot be found; no
    ///   sink or job is created.
    /// - `AppError::Spawn` if the process fails to start; the error is
    ///   also rendered into the job's sink, but no job is registered.
    pub fn start_streaming_job(&mut self, prompt: &str) -> Result<JobId> {
        self.agent.locate()?;

        let id = self.allocate_id();
        let span = info_span!("start_streaming_job", job_id = %id);
        let _guard = span.enter();

        let sink = self.sinks.create(id.as_str(), &self.config.placeholder);

        let process = match spawn_one_shot(&self.agent, prompt, Some(OutputFormat::StreamJson)) {
            Ok(process) => process,
            Err(err) => {
                warn!(%err, "streaming job failed to start");
                sink.replace(&[format!("[agent failed to start: {err}]")]);
                return Err(err);
            }
        };

        let cancel = CancellationToken::new();
        let job = JobContext::new(id.clone(), sink, process.pid(), cancel.clone());
        info!(pid = ?job.pid, started_at = %job.started_at, "streaming job started");
        self.jobs.insert(id.clone(), job);

        drop(spawn_job_pump(id.clone(), process, self.tx.clone(), cancel));
        Ok(id)
    }

    /// Register a job whose messages are produced outside the supervisor.
    ///
    /// The caller feeds output through [`Supervisor::sender`] (or directly
    /// via [`Supervisor::handle`]) and must finish with
    /// [`JobMessage::Exited`]. Cancelling fires the returned token.
    pub fn attach_external(&mut self, sink: Arc<dyn OutputSink>) -> (JobId, CancellationToken) {
        let id = self.allocate_id();
        let cancel = CancellationToken::new();
        self.jobs.insert(
            id.clone(),
            JobContext::new(id.clone(), sink, None, cancel.clone()),
        );
        debug!(job_id = %id, "external job attached");
        (id, cancel)
    }

    /// Request termination of a job's process.
    ///
    /// The job stays registered until its exit message is processed.
    pub fn cancel(&mut self, id: &JobId) -> CancelOutcome {
        match self.jobs.get(id) {
            Some(job) => {
                info!(job_id = %id, pid = ?job.pid, "cancelling job");
                job.cancel.cancel();
                CancelOutcome::Signalled(id.clone())
            }
            None => {
                warn!(job_id = %id, "cancel requested for unknown job");
                CancelOutcome::UnknownJob(id.clone())
            }
        }
    }

    /// Queue handle for feeding job messages.
    #[must_use]
    pub fn sender(&self) -> mpsc::UnboundedSender<JobMessage> {
        self.tx.clone()
    }

    /// Wait for the next queued job message.
    ///
    /// Never resolves to `None` while the supervisor is alive, since it
    /// holds a sender itself. Cancel-safe.
    pub async fn next_message(&mut self) -> Option<JobMessage> {
        self.rx.recv().await
    }

    /// Process queued messages until no job remains registered.
    pub async fn run_until_idle(&mut self) {
        while !self.jobs.is_empty() {
            let Some(msg) = self.rx.recv().await else {
                break;
            };
            self.handle(msg);
        }
    }

    /// Apply one job message to the registry.
    pub fn handle(&mut self, msg: JobMessage) {
        match msg {
            JobMessage::Stdout { job_id, chunk } => {
                let Some(job) = self.jobs.get_mut(&job_id) else {
                    debug!(%job_id, "stdout for unregistered job dropped");
                    return;
                };
                for line in job.framer.push(&chunk) {
                    render_line(job, &line);
                }
            }
            JobMessage::Stderr { job_id, line } => {
                let Some(job) = self.jobs.get_mut(&job_id) else {
                    debug!(%job_id, "stderr for unregistered job dropped");
                    return;
                };
                append_line(job, &format!("{}{line}", self.config.stderr_marker));
            }
            JobMessage::Exited { job_id, status } => self.finish(&job_id, status),
        }
    }

    /// Identifiers of all registered jobs, sorted.
    #[must_use]
    pub fn active_jobs(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Whether `id` is registered.
    #[must_use]
    pub fn is_active(&self, id: &JobId) -> bool {
        self.jobs.contains_key(id)
    }

    /// Borrow a registered job's context.
    #[must_use]
    pub fn job(&self, id: &JobId) -> Option<&JobContext> {
        self.jobs.get(id)
    }

    fn allocate_id(&mut self) -> JobId {
        let id = JobId::from_seq(self.next_seq);
        self.next_seq += 1;
        id
    }

    /// Flush, summarise, and remove a job whose process exited.
    fn finish(&mut self, id: &JobId, status: ExitStatus) {
        let Some(mut job) = self.jobs.remove(id) else {
            debug!(job_id = %id, "exit for unregistered job ignored");
            return;
        };

        if let Some(residual) = job.framer.finish() {
            render_line(&mut job, &residual);
        }

        let elapsed = job.started.elapsed();
        let summary = ExitSummary::classify(status, job.is_done(), elapsed);
        append_line(&mut job, &summary.to_string());

        info!(
            job_id = %id,
            exit_code = ?status.code,
            elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
            has_result = job.is_done(),
            "streaming job finished"
        );
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("jobs", &self.jobs)
            .field("next_seq", &self.next_seq)
            .finish_non_exhaustive()
    }
}

// ── Rendering ─────────────────────────────────────────────────────────────────

/// Decode one stdout line and apply it to the job and its sink.
fn render_line(job: &mut JobContext, line: &str) {
    if job.is_done() {
        debug!(job_id = %job.id, "output after terminal result dropped");
        return;
    }

    let event = decode_line(line);

    if !job.seen_first_event {
        job.sink.replace(&[]);
        job.seen_first_event = true;
        job.mid_line = false;
    }

    match event {
        DecodedEvent::AssistantText { fragments } => {
            if fragments.is_empty() {
                return;
            }
            let text = fragments.concat();
            job.mid_line = !text.ends_with('\n');
            job.sink.append(&text);
        }
        DecodedEvent::Result { text } => {
            let mut lines: Vec<String> = text.lines().map(str::to_owned).collect();
            lines.push(String::new());
            job.sink.replace(&lines);
            job.mid_line = false;
            job.final_result = Some(text);
            debug!(job_id = %job.id, "terminal result rendered");
        }
        DecodedEvent::Unparseable { raw_line } => append_line(job, &raw_line),
        DecodedEvent::Other { raw_type } => {
            debug!(job_id = %job.id, raw_type, "ignoring protocol event");
        }
    }
}

/// Append `line` as a line of its own, breaking after streamed text if needed.
fn append_line(job: &mut JobContext, line: &str) {
    let text = if job.mid_line {
        format!("\n{line}\n")
    } else {
        format!("{line}\n")
    };
    job.sink.append(&text);
    job.mid_line = false;
}
