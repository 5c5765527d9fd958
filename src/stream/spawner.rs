//! Agent process spawner.
//!
//! Builds the agent's argument vector and spawns it with:
//! - `kill_on_drop(true)` so processes are cleaned up automatically.
//! - Piped stdout/stderr for every process; piped stdin only for the
//!   interactive session (one-shot jobs get `/dev/null`).
//! - The configured working directory, when set.
//!
//! One-shot argument vector:
//! `<binary> --print [--output-format <fmt>] [--model <name>] [extra…] <prompt>`
//!
//! Interactive session argument vector: `<binary> [--model <name>]`.

use std::path::PathBuf;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tracing::{debug, info, warn};

use crate::config::{OutputFormat, RelayConfig};
use crate::{AppError, Result};

// ── Command builder ──────────────────────────────────────────────────────────

/// How to invoke the agent binary.
#[derive(Debug, Clone)]
pub struct AgentCommand {
    /// Agent executable name or path.
    pub binary: String,
    /// Model forwarded with `--model`.
    pub model: Option<String>,
    /// Extra one-shot arguments inserted before the prompt.
    pub extra_args: Vec<String>,
    /// Working directory for the child.
    pub working_dir: Option<PathBuf>,
}

impl AgentCommand {
    /// Build from relay configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            model: config.model.clone(),
            extra_args: config.extra_args.clone(),
            working_dir: config.working_dir.clone(),
        }
    }

    /// Arguments for a one-shot run of `prompt`.
    #[must_use]
    pub fn one_shot_args(&self, prompt: &str, format: Option<OutputFormat>) -> Vec<String> {
        let mut args = vec!["--print".to_owned()];
        if let Some(format) = format {
            args.push("--output-format".to_owned());
            args.push(format.as_arg().to_owned());
        }
        if let Some(model) = &self.model {
            args.push("--model".to_owned());
            args.push(model.clone());
        }
        args.extend(self.extra_args.iter().cloned());
        args.push(prompt.to_owned());
        args
    }

    /// Arguments for the interactive session.
    #[must_use]
    pub fn session_args(&self) -> Vec<String> {
        self.model
            .as_ref()
            .map(|model| vec!["--model".to_owned(), model.clone()])
            .unwrap_or_default()
    }

    /// Whether the binary can be found.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.locate().is_ok()
    }

    /// Resolve the binary through `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unavailable` when the binary cannot be found.
    pub fn locate(&self) -> Result<PathBuf> {
        which::which(&self.binary).map_err(|err| {
            AppError::Unavailable(format!("agent binary `{}` not found: {err}", self.binary))
        })
    }

    fn command(&self, args: &[String], stdin: Stdio) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }
}

// ── Process handles ──────────────────────────────────────────────────────────

/// A spawned process with its output streams detached from the handle.
#[derive(Debug)]
pub struct AgentProcess {
    /// Child process handle; dropping it kills the process.
    pub child: Child,
    /// Agent's stdin, present only for the interactive session.
    pub stdin: Option<ChildStdin>,
    /// Agent's stdout.
    pub stdout: ChildStdout,
    /// Agent's stderr.
    pub stderr: ChildStderr,
}

impl AgentProcess {
    /// OS process id, if the process is still known to the OS.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Spawn a one-shot agent run for `prompt`.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the OS refuses to start the process or
/// its output streams cannot be captured.
pub fn spawn_one_shot(
    agent: &AgentCommand,
    prompt: &str,
    format: Option<OutputFormat>,
) -> Result<AgentProcess> {
    let args = agent.one_shot_args(prompt, format);
    debug!(binary = %agent.binary, ?format, "spawning one-shot agent");
    spawn(agent, &args, Stdio::null())
}

/// Spawn the interactive agent session.
///
/// # Errors
///
/// Returns `AppError::Spawn` if the OS refuses to start the process or
/// its stdio cannot be captured.
pub fn spawn_session(agent: &AgentCommand) -> Result<AgentProcess> {
    let args = agent.session_args();
    debug!(binary = %agent.binary, "spawning interactive agent session");
    spawn(agent, &args, Stdio::piped())
}

fn spawn(agent: &AgentCommand, args: &[String], stdin: Stdio) -> Result<AgentProcess> {
    let mut child = agent
        .command(args, stdin)
        .spawn()
        .map_err(|err| AppError::Spawn(format!("failed to spawn `{}`: {err}", agent.binary)))?;

    let stdin = child.stdin.take();
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture agent stderr".into()))?;

    info!(
        pid = child.id().unwrap_or(0),
        binary = %agent.binary,
        "agent process spawned"
    );

    Ok(AgentProcess {
        child,
        stdin,
        stdout,
        stderr,
    })
}

// ── Termination ──────────────────────────────────────────────────────────────

/// Ask `child` to stop: `SIGTERM` on Unix, a hard kill elsewhere.
///
/// Best-effort; the caller still observes the exit through `wait`.
pub fn terminate(child: &mut Child) {
    #[cfg(unix)]
    if let Some(raw) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        match kill(Pid::from_raw(raw), Signal::SIGTERM) {
            Ok(()) => {
                debug!(pid = raw, "sent SIGTERM to agent process");
                return;
            }
            Err(err) => warn!(pid = raw, %err, "SIGTERM failed, falling back to kill"),
        }
    }

    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to kill agent process");
    }
}
