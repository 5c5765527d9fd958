//! Error types shared across the relay.

use std::fmt::{Display, Formatter};

/// Shared relay result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Relay error enumeration covering all domain failure modes.
///
/// Job-level failures (decode errors, abnormal exits) never surface here;
/// they are rendered into the job's sink instead.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// The agent binary could not be located.
    Unavailable(String),
    /// The agent process could not be started.
    Spawn(String),
    /// Requested job or session does not exist.
    NotFound(String),
    /// The relay loop has shut down and can no longer accept commands.
    Closed(String),
    /// File-system or process I/O failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Unavailable(msg) => write!(f, "unavailable: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Closed(msg) => write!(f, "closed: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
