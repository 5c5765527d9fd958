#![forbid(unsafe_code)]

//! Relay between an editor and a command-line AI agent.
//!
//! The relay spawns agent processes, frames and decodes their streamed
//! output, renders it into live display sinks, and manages a single
//! long-lived interactive session. [`relay::Relay`] is the entry point.

pub mod config;
pub mod errors;
pub mod orchestrator;
pub mod relay;
pub mod sink;
pub mod stream;

pub use config::RelayConfig;
pub use errors::{AppError, Result};
