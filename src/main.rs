#![forbid(unsafe_code)]

//! `agent-relay`: drive a command-line AI agent from the terminal.
//!
//! Loads configuration, starts the relay loop, and runs one of the
//! subcommands against it: an availability check, a blocking one-shot
//! question, a streamed job rendered live, or an interactive session.

use std::io::{Stdout, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_relay::config::OutputFormat;
use agent_relay::orchestrator::job::JobId;
use agent_relay::relay::{Relay, RelayHandle};
use agent_relay::sink::{BufferSinkFactory, OutputSink, SinkFactory};
use agent_relay::{AppError, RelayConfig, Result};

/// How often the CLI polls job and session state.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum FormatArg {
    Text,
    Json,
    StreamJson,
}

impl From<FormatArg> for OutputFormat {
    fn from(value: FormatArg) -> Self {
        match value {
            FormatArg::Text => Self::Text,
            FormatArg::Json => Self::Json,
            FormatArg::StreamJson => Self::StreamJson,
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "agent-relay", about = "Streaming relay for command-line AI agents", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the agent binary.
    #[arg(long)]
    binary: Option<String>,

    /// Override the model passed to the agent.
    #[arg(long)]
    model: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Report whether the agent binary can be found.
    Check,
    /// Ask a question and print the answer once the agent finishes.
    Ask {
        /// Prompt text.
        prompt: String,
        /// Output format requested from the agent.
        #[arg(long, value_enum)]
        format: Option<FormatArg>,
    },
    /// Stream the agent's answer as it arrives; Ctrl-C cancels.
    Stream {
        /// Prompt text.
        prompt: String,
    },
    /// Start an interactive session fed from stdin.
    Repl,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = match &args.config {
        Some(path) => RelayConfig::load_from_path(path)?,
        None => RelayConfig::default(),
    };
    config.apply_env_overrides();
    if let Some(binary) = args.binary {
        config.binary = binary;
    }
    if let Some(model) = args.model.filter(|m| !m.trim().is_empty()) {
        config.model = Some(model);
    }
    let default_format = config.output_format;
    info!(binary = %config.binary, "configuration loaded");

    // ── Start relay ─────────────────────────────────────
    let sinks: Arc<dyn SinkFactory> = match args.command {
        Command::Stream { .. } => Arc::new(ConsoleSinkFactory),
        _ => Arc::new(BufferSinkFactory::new()),
    };
    let (relay, relay_task) = Relay::spawn(config, sinks);

    let outcome = match args.command {
        Command::Check => check(&relay),
        Command::Ask { prompt, format } => {
            let format = format.map_or(default_format, OutputFormat::from);
            relay
                .run_one_shot(&prompt, format)
                .await
                .map(|answer| println!("{answer}"))
        }
        Command::Stream { prompt } => stream(&relay, &prompt).await,
        Command::Repl => repl(&relay).await,
    };

    // ── Shut down ───────────────────────────────────────
    relay.shutdown().await;
    if let Err(err) = relay_task.await {
        warn!(%err, "relay task ended abnormally");
    }
    outcome
}

fn check(relay: &RelayHandle) -> Result<()> {
    if relay.availability() {
        println!("agent available");
        Ok(())
    } else {
        Err(AppError::Unavailable("agent binary not found on PATH".into()))
    }
}

async fn stream(relay: &RelayHandle, prompt: &str) -> Result<()> {
    let job_id = relay.start_streaming_job(prompt).await?;
    wait_for_job(relay, &job_id).await
}

/// Poll until `job_id` leaves the registry, cancelling it on Ctrl-C.
async fn wait_for_job(relay: &RelayHandle, job_id: &JobId) -> Result<()> {
    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut cancelled = false;

    loop {
        tokio::select! {
            () = &mut signal, if !cancelled => {
                info!(%job_id, "interrupt received, cancelling job");
                let outcome = relay.cancel(job_id).await?;
                if let Some(warning) = outcome.warning() {
                    warn!(%warning, "cancel had no effect");
                }
                cancelled = true;
            }
            _ = ticker.tick() => {
                if !relay.active_jobs().await?.contains(job_id) {
                    return Ok(());
                }
            }
        }
    }
}

async fn repl(relay: &RelayHandle) -> Result<()> {
    let surface = relay.open_session().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let signal = shutdown_signal();
    tokio::pin!(signal);
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    let mut shown = 0;

    loop {
        tokio::select! {
            () = &mut signal => break,
            line = lines.next_line() => match line? {
                Some(line) => relay.send_to_session(&line).await?,
                None => break,
            },
            _ = ticker.tick() => shown = echo_new_output(&surface.contents(), shown),
        }
    }

    echo_new_output(&surface.contents(), shown);
    Ok(())
}

/// Print whatever was appended past byte offset `shown`; returns the new offset.
fn echo_new_output(contents: &str, shown: usize) -> usize {
    if let Some(fresh) = contents.get(shown..).filter(|s| !s.is_empty()) {
        print!("{fresh}");
        let _ = std::io::stdout().flush();
    }
    contents.len().max(shown)
}

// ── Console sink ────────────────────────────────────────

/// Printed between streamed text and a final result that differs from it.
const RESULT_SEPARATOR: &str = "── result ──";

/// Writes a streamed job straight to the terminal.
///
/// Appends are printed as they arrive. A terminal cannot take back printed
/// text, so a replacement matching what was already streamed only ends the
/// line, and a differing one is printed below [`RESULT_SEPARATOR`].
#[derive(Debug)]
struct ConsoleSink<W = Stdout> {
    state: Mutex<ConsoleState<W>>,
}

#[derive(Debug)]
struct ConsoleState<W> {
    out: W,
    mid_line: bool,
    /// Text appended since the last replacement.
    streamed: String,
}

impl<W: Write> ConsoleSink<W> {
    fn new(out: W) -> Self {
        Self {
            state: Mutex::new(ConsoleState {
                out,
                mid_line: false,
                streamed: String::new(),
            }),
        }
    }
}

impl<W: Write> ConsoleState<W> {
    fn append(&mut self, text: &str) {
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
        self.mid_line = !text.ends_with('\n');
        self.streamed.push_str(text);
    }

    fn replace(&mut self, lines: &[String]) {
        let streamed = std::mem::take(&mut self.streamed);
        if lines.is_empty() {
            return;
        }
        if self.mid_line {
            let _ = writeln!(self.out);
        }
        if streamed.trim_end() != lines.join("\n").trim_end() {
            if !streamed.trim().is_empty() {
                let _ = writeln!(self.out, "{RESULT_SEPARATOR}");
            }
            for line in lines {
                let _ = writeln!(self.out, "{line}");
            }
        }
        let _ = self.out.flush();
        self.mid_line = false;
    }
}

impl<W: Write + Send> OutputSink for ConsoleSink<W> {
    fn append(&self, text: &str) {
        if !text.is_empty() {
            self.state
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .append(text);
        }
    }

    fn replace(&self, lines: &[String]) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(lines);
    }
}

#[derive(Debug)]
struct ConsoleSinkFactory;

impl SinkFactory for ConsoleSinkFactory {
    fn create(&self, title: &str, placeholder: &str) -> Arc<dyn OutputSink> {
        if !placeholder.is_empty() {
            eprintln!("{title}: {placeholder}");
        }
        Arc::new(ConsoleSink::new(std::io::stdout()))
    }
}

// ── Process plumbing ────────────────────────────────────

/// Wait for a shutdown signal (SIGTERM or Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

/// Initialise tracing on stderr so stdout stays reserved for agent output.
fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
