//! Relay configuration parsing and validation.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

use crate::{AppError, Result};

/// Environment variable that overrides [`RelayConfig::binary`].
pub const BINARY_ENV_VAR: &str = "AGENT_RELAY_BINARY";

/// Output format requested from the agent for one-shot invocations.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum OutputFormat {
    /// Plain text; the whole stdout is the answer.
    Text,
    /// A single JSON document whose `result` field is the answer.
    Json,
    /// Newline-delimited JSON events.
    #[default]
    StreamJson,
}

impl OutputFormat {
    /// Value passed to the agent's `--output-format` flag.
    #[must_use]
    pub fn as_arg(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Json => "json",
            Self::StreamJson => "stream-json",
        }
    }
}

/// Timeouts layered on top of the core by the relay.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Cancel a streaming job after this many seconds; 0 means no timeout.
    #[serde(default)]
    pub job_seconds: u64,
}

impl TimeoutConfig {
    /// Job timeout as a [`Duration`], or `None` when disabled.
    #[must_use]
    pub fn job_timeout(&self) -> Option<Duration> {
        (self.job_seconds > 0).then(|| Duration::from_secs(self.job_seconds))
    }
}

/// Interactive session presentation settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionConfig {
    /// Title of the session's display surface.
    #[serde(default = "default_session_title")]
    pub title: String,
    /// Number of lines visible in the session's viewport.
    #[serde(default = "default_viewport_height")]
    pub viewport_height: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            title: default_session_title(),
            viewport_height: default_viewport_height(),
        }
    }
}

fn default_binary() -> String {
    "claude".into()
}

fn default_placeholder() -> String {
    "working…".into()
}

fn default_stderr_marker() -> String {
    "[stderr] ".into()
}

fn default_session_title() -> String {
    "*agent-session*".into()
}

fn default_viewport_height() -> usize {
    40
}

/// Relay configuration, usually parsed from `relay.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RelayConfig {
    /// Agent executable, resolved through `PATH` when not absolute.
    #[serde(default = "default_binary")]
    pub binary: String,
    /// Model name forwarded with `--model`.
    #[serde(default)]
    pub model: Option<String>,
    /// Default output format for one-shot runs.
    #[serde(default)]
    pub output_format: OutputFormat,
    /// Extra arguments inserted before the prompt (e.g. `--verbose`).
    #[serde(default)]
    pub extra_args: Vec<String>,
    /// Working directory for spawned agent processes.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Text shown in a job's sink until its first event arrives.
    #[serde(default = "default_placeholder")]
    pub placeholder: String,
    /// Prefix for stderr lines appended to a job's sink.
    #[serde(default = "default_stderr_marker")]
    pub stderr_marker: String,
    /// Timeout settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Interactive session settings.
    #[serde(default)]
    pub session: SessionConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            model: None,
            output_format: OutputFormat::default(),
            extra_args: Vec::new(),
            working_dir: None,
            placeholder: default_placeholder(),
            stderr_marker: default_stderr_marker(),
            timeouts: TimeoutConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl RelayConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the [`BINARY_ENV_VAR`] override, if set and non-empty.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(binary) = env::var(BINARY_ENV_VAR) {
            if !binary.trim().is_empty() {
                debug!(binary, "agent binary overridden from environment");
                self.binary = binary;
            }
        }
    }

    fn validate(&mut self) -> Result<()> {
        if self.binary.trim().is_empty() {
            return Err(AppError::Config("binary must not be empty".into()));
        }

        if self.session.viewport_height == 0 {
            return Err(AppError::Config(
                "session.viewport_height must be greater than zero".into(),
            ));
        }

        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            self.model = None;
        }

        if let Some(dir) = &self.working_dir {
            let canonical = dir
                .canonicalize()
                .map_err(|err| AppError::Config(format!("working_dir invalid: {err}")))?;
            self.working_dir = Some(canonical);
        }

        Ok(())
    }
}
