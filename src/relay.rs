//! Public operations exposed to the editor's command layer.
//!
//! [`Relay::spawn`] starts one consumer task that owns the [`Supervisor`]
//! and the [`SessionManager`]. Caller commands, job I/O messages, session
//! exits, and timeout expiries all funnel into that task and are handled
//! one at a time, so no state is ever touched from two places at once.
//! [`RelayHandle`] is the cheap, cloneable front door.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{OutputFormat, RelayConfig};
use crate::orchestrator::job::JobId;
use crate::orchestrator::one_shot;
use crate::orchestrator::session::{SessionManager, SessionState};
use crate::orchestrator::supervisor::{CancelOutcome, Supervisor};
use crate::sink::{BufferSink, SinkFactory};
use crate::stream::spawner::AgentCommand;
use crate::{AppError, Result};

/// How long shutdown waits for cancelled jobs to report their exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Capacity of the command queue.
const COMMAND_QUEUE_CAPACITY: usize = 64;

enum Command {
    StartJob {
        prompt: String,
        reply: oneshot::Sender<Result<JobId>>,
    },
    Cancel {
        job_id: JobId,
        reply: oneshot::Sender<CancelOutcome>,
    },
    ActiveJobs {
        reply: oneshot::Sender<Vec<JobId>>,
    },
    OpenSession {
        reply: oneshot::Sender<Result<BufferSink>>,
    },
    ToggleSession {
        reply: oneshot::Sender<Result<SessionState>>,
    },
    SendToSession {
        text: String,
        reply: oneshot::Sender<Result<()>>,
    },
    Shutdown,
}

/// Consumer task state.
pub struct Relay {
    config: Arc<RelayConfig>,
    supervisor: Supervisor,
    session: SessionManager,
    commands: mpsc::Receiver<Command>,
    expired_tx: mpsc::UnboundedSender<JobId>,
    expired_rx: mpsc::UnboundedReceiver<JobId>,
}

impl Relay {
    /// Start the consumer task and return a handle to it.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(config: RelayConfig, sinks: Arc<dyn SinkFactory>) -> (RelayHandle, JoinHandle<()>) {
        let config = Arc::new(config);
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let (expired_tx, expired_rx) = mpsc::unbounded_channel();

        let relay = Self {
            supervisor: Supervisor::new(Arc::clone(&config), sinks),
            session: SessionManager::new(Arc::clone(&config)),
            config: Arc::clone(&config),
            commands,
            expired_tx,
            expired_rx,
        };

        let handle = RelayHandle {
            tx,
            agent: AgentCommand::from_config(&config),
        };
        (handle, tokio::spawn(relay.run()))
    }

    async fn run(mut self) {
        info!(binary = %self.config.binary, "relay started");

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break,
                    Some(command) => self.dispatch(command),
                },

                Some(msg) = self.supervisor.next_message() => self.supervisor.handle(msg),

                Some(exit) = self.session.next_exit() => self.session.on_exit(exit),

                Some(job_id) = self.expired_rx.recv() => {
                    if self.supervisor.is_active(&job_id) {
                        warn!(%job_id, "job timed out, cancelling");
                        self.supervisor.cancel(&job_id);
                    }
                }
            }
        }

        self.shutdown().await;
    }

    fn dispatch(&mut self, command: Command) {
        match command {
            Command::StartJob { prompt, reply } => {
                let result = self.supervisor.start_streaming_job(&prompt);
                if let (Ok(job_id), Some(timeout)) = (&result, self.config.timeouts.job_timeout()) {
                    self.schedule_timeout(job_id.clone(), timeout);
                }
                let _ = reply.send(result);
            }
            Command::Cancel { job_id, reply } => {
                let _ = reply.send(self.supervisor.cancel(&job_id));
            }
            Command::ActiveJobs { reply } => {
                let _ = reply.send(self.supervisor.active_jobs());
            }
            Command::OpenSession { reply } => {
                let _ = reply.send(self.session.open());
            }
            Command::ToggleSession { reply } => {
                let _ = reply.send(self.session.toggle());
            }
            Command::SendToSession { text, reply } => {
                let _ = reply.send(self.session.send(&text));
            }
            Command::Shutdown => {}
        }
    }

    fn schedule_timeout(&self, job_id: JobId, timeout: Duration) {
        let expired_tx = self.expired_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = expired_tx.send(job_id);
        });
    }

    /// Cancel every job, give them a grace period to exit, close the session.
    async fn shutdown(&mut self) {
        let active = self.supervisor.active_jobs();
        for job_id in &active {
            self.supervisor.cancel(job_id);
        }

        if !active.is_empty()
            && tokio::time::timeout(SHUTDOWN_GRACE, self.supervisor.run_until_idle())
                .await
                .is_err()
        {
            warn!(
                remaining = self.supervisor.active_jobs().len(),
                "jobs did not exit within shutdown grace period"
            );
        }

        self.session.close();
        info!(cancelled = active.len(), "relay shut down");
    }
}

/// Cloneable handle for issuing relay operations.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<Command>,
    agent: AgentCommand,
}

impl RelayHandle {
    /// Whether the agent binary can be found.
    #[must_use]
    pub fn availability(&self) -> bool {
        self.agent.is_available()
    }

    /// Run the agent to completion and return its answer (possibly empty).
    ///
    /// Runs on the caller's task; the relay loop is not involved.
    ///
    /// # Errors
    ///
    /// See [`one_shot::run_one_shot`].
    pub async fn run_one_shot(&self, prompt: &str, format: OutputFormat) -> Result<String> {
        one_shot::run_one_shot(&self.agent, prompt, format).await
    }

    /// Start a streaming job rendered into a new sink.
    ///
    /// # Errors
    ///
    /// `AppError::Unavailable`, `AppError::Spawn`, or `AppError::Closed`.
    pub async fn start_streaming_job(&self, prompt: &str) -> Result<JobId> {
        let prompt = prompt.to_owned();
        self.request(|reply| Command::StartJob { prompt, reply })
            .await?
    }

    /// Request cancellation of a job; unknown ids yield a warning outcome.
    ///
    /// # Errors
    ///
    /// `AppError::Closed` if the relay has shut down.
    pub async fn cancel(&self, job_id: &JobId) -> Result<CancelOutcome> {
        let job_id = job_id.clone();
        self.request(|reply| Command::Cancel { job_id, reply }).await
    }

    /// Identifiers of all running jobs.
    ///
    /// # Errors
    ///
    /// `AppError::Closed` if the relay has shut down.
    pub async fn active_jobs(&self) -> Result<Vec<JobId>> {
        self.request(|reply| Command::ActiveJobs { reply }).await
    }

    /// Open (or focus) the interactive session and return its surface.
    ///
    /// # Errors
    ///
    /// Spawn errors, or `AppError::Closed`.
    pub async fn open_session(&self) -> Result<BufferSink> {
        self.request(|reply| Command::OpenSession { reply }).await?
    }

    /// Toggle the interactive session's visibility.
    ///
    /// # Errors
    ///
    /// Spawn errors, or `AppError::Closed`.
    pub async fn toggle_session(&self) -> Result<SessionState> {
        self.request(|reply| Command::ToggleSession { reply })
            .await?
    }

    /// Send a line of input to the interactive session.
    ///
    /// # Errors
    ///
    /// Spawn or delivery errors, or `AppError::Closed`.
    pub async fn send_to_session(&self, text: &str) -> Result<()> {
        let text = text.to_owned();
        self.request(|reply| Command::SendToSession { text, reply })
            .await?
    }

    /// Stop the relay: cancel all jobs and close the session.
    pub async fn shutdown(&self) {
        if self.tx.send(Command::Shutdown).await.is_err() {
            debug!("relay already stopped");
        }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| AppError::Closed("relay is not running".into()))?;
        response
            .await
            .map_err(|_| AppError::Closed("relay dropped the request".into()))
    }
}
