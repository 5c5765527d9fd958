//! Interactive session manager.
//!
//! At most one long-lived interactive agent process exists per manager.
//! The session's output is appended raw to a [`BufferSink`] that serves as
//! its display surface; hiding the session detaches the viewport but keeps
//! both the process and the content.
//!
//! # State machine
//!
//! `Absent → Open ⇄ Hidden → … → Absent`
//!
//! - [`SessionManager::open`] focuses an existing session or spawns one.
//! - [`SessionManager::toggle`] hides a visible session, shows a hidden one,
//!   and opens an absent one.
//! - [`SessionManager::send`] writes a line to the process, opening the
//!   session first (without focusing it) when no process is running.
//! - A process exit clears the process handle; the surface stays for the
//!   user to close.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn};

use crate::config::RelayConfig;
use crate::orchestrator::job::ExitStatus;
use crate::sink::{BufferSink, OutputSink};
use crate::stream::pump::{spawn_session_pump, SessionExit};
use crate::stream::spawner::{spawn_session, AgentCommand};
use crate::stream::writer::run_writer;
use crate::{AppError, Result};

/// Capacity of the queue between [`SessionManager::send`] and the writer.
const INPUT_QUEUE_CAPACITY: usize = 64;

/// Observable state of the interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session surface and no process.
    Absent,
    /// The surface is visible.
    Open,
    /// The surface is detached (or closed) while the session still exists.
    Hidden,
}

/// Handle on the running session process.
#[derive(Debug)]
struct LiveProcess {
    generation: u64,
    pid: Option<u32>,
    input: mpsc::Sender<String>,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct ReplSession {
    surface: BufferSink,
    process: Option<LiveProcess>,
}

/// Owner of the singleton interactive session.
#[derive(Debug)]
pub struct SessionManager {
    config: Arc<RelayConfig>,
    agent: AgentCommand,
    session: Option<ReplSession>,
    generation: u64,
    exit_tx: mpsc::UnboundedSender<SessionExit>,
    exit_rx: mpsc::UnboundedReceiver<SessionExit>,
}

impl SessionManager {
    /// Create a manager with no session.
    #[must_use]
    pub fn new(config: Arc<RelayConfig>) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        Self {
            agent: AgentCommand::from_config(&config),
            config,
            session: None,
            generation: 0,
            exit_tx,
            exit_rx,
        }
    }

    /// Show and focus the session, spawning the process if needed.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unavailable` or `AppError::Spawn` when a new
    /// process is required and cannot be started.
    pub fn open(&mut self) -> Result<BufferSink> {
        let surface = self.ensure_running()?;
        surface.focus();
        Ok(surface)
    }

    /// Hide a visible session, show a hidden one, or open an absent one.
    ///
    /// # Errors
    ///
    /// Same as [`SessionManager::open`] when a process must be spawned.
    pub fn toggle(&mut self) -> Result<SessionState> {
        match self.state() {
            SessionState::Open => {
                if let Some(session) = &self.session {
                    session.surface.detach_viewport();
                    debug!("interactive session hidden");
                }
            }
            SessionState::Hidden if self.is_process_alive() && self.surface_is_live() => {
                if let Some(session) = &self.session {
                    session
                        .surface
                        .attach_viewport(self.config.session.viewport_height);
                    session.surface.focus();
                    debug!("interactive session shown");
                }
            }
            SessionState::Hidden | SessionState::Absent => {
                self.open()?;
            }
        }
        Ok(self.state())
    }

    /// Write `text` plus a line terminator to the session's input.
    ///
    /// Opens the session first when no process is running, but never moves
    /// focus to it.
    ///
    /// # Errors
    ///
    /// - Spawn errors from opening the session.
    /// - `AppError::Io` if the input queue is full or the writer has stopped.
    pub fn send(&mut self, text: &str) -> Result<()> {
        if !self.is_process_alive() {
            self.ensure_running()?;
        }

        let process = self
            .session
            .as_ref()
            .and_then(|session| session.process.as_ref())
            .ok_or_else(|| AppError::NotFound("interactive session has no process".into()))?;

        process.input.try_send(text.to_owned()).map_err(|err| {
            warn!(generation = process.generation, %err, "session input not delivered");
            AppError::Io(format!("session input not delivered: {err}"))
        })
    }

    /// Terminate the process and discard the surface.
    pub fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Some(process) = session.process {
                process.cancel.cancel();
            }
            session.surface.close();
            info!("interactive session closed");
        }
    }

    /// Apply a process-exit notification.
    ///
    /// Exits from earlier session processes are ignored.
    pub fn on_exit(&mut self, exit: SessionExit) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let current = session.process.as_ref().map(|p| p.generation);
        if current != Some(exit.generation) {
            debug!(generation = exit.generation, "stale session exit ignored");
            return;
        }

        session.process = None;
        session
            .surface
            .append(&format!("\n{}\n", exit_note(exit.status)));
        info!(generation = exit.generation, code = ?exit.status.code, "interactive session process exited");
    }

    /// Wait for the next session exit notification. Cancel-safe.
    pub async fn next_exit(&mut self) -> Option<SessionExit> {
        self.exit_rx.recv().await
    }

    /// Current state of the singleton.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match &self.session {
            None => SessionState::Absent,
            Some(session) if session.surface.is_visible() => SessionState::Open,
            Some(session) if session.surface.is_closed() && session.process.is_none() => {
                SessionState::Absent
            }
            Some(_) => SessionState::Hidden,
        }
    }

    /// Whether a session process is currently running.
    #[must_use]
    pub fn is_process_alive(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.process.is_some())
    }

    /// OS process id of the session process, when running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.session
            .as_ref()
            .and_then(|session| session.process.as_ref())
            .and_then(|process| process.pid)
    }

    /// The session's display surface, if one exists.
    #[must_use]
    pub fn surface(&self) -> Option<BufferSink> {
        self.session.as_ref().map(|session| session.surface.clone())
    }

    fn surface_is_live(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| !session.surface.is_closed())
    }

    /// Make sure a visible surface with a running process exists.
    fn ensure_running(&mut self) -> Result<BufferSink> {
        let height = self.config.session.viewport_height;

        if self.surface_is_live() && self.is_process_alive() {
            if let Some(session) = &self.session {
                if !session.surface.is_visible() {
                    session.surface.attach_viewport(height);
                }
                return Ok(session.surface.clone());
            }
        }

        self.agent.locate()?;

        let surface = match self.session.take() {
            Some(session) if !session.surface.is_closed() => {
                debug!("reusing session surface for a new process");
                session.surface
            }
            Some(session) => {
                if let Some(process) = session.process {
                    process.cancel.cancel();
                }
                BufferSink::new(&self.config.session.title)
            }
            None => BufferSink::new(&self.config.session.title),
        };

        let process = match self.spawn_process(&surface) {
            Ok(process) => process,
            Err(err) => {
                surface.append(&format!("[session failed to start: {err}]\n"));
                self.session = Some(ReplSession {
                    surface,
                    process: None,
                });
                return Err(err);
            }
        };
        surface.attach_viewport(height);
        self.session = Some(ReplSession {
            surface: surface.clone(),
            process: Some(process),
        });
        Ok(surface)
    }

    fn spawn_process(&mut self, surface: &BufferSink) -> Result<LiveProcess> {
        self.generation += 1;
        let generation = self.generation;
        let span = info_span!("open_session", generation);
        let _guard = span.enter();

        let mut process = spawn_session(&self.agent)?;
        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| AppError::Spawn("failed to capture session stdin".into()))?;
        let pid = process.pid();

        let cancel = CancellationToken::new();
        let (input, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(err) = run_writer(generation, stdin, input_rx, writer_cancel).await {
                warn!(generation, %err, "session writer stopped");
            }
        });
        drop(spawn_session_pump(
            generation,
            process,
            surface.clone(),
            self.exit_tx.clone(),
            cancel.clone(),
        ));

        info!(pid = ?pid, "interactive session started");
        Ok(LiveProcess {
            generation,
            pid,
            input,
            cancel,
        })
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(process) = self.session.as_ref().and_then(|s| s.process.as_ref()) {
            process.cancel.cancel();
        }
    }
}

fn exit_note(status: ExitStatus) -> String {
    status.code.map_or_else(
        || "[session terminated by signal]".to_owned(),
        |code| format!("[session exited with code {code}]"),
    )
}
