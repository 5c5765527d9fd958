//! Job and session orchestration.
//!
//! Covers the streaming job registry and its per-job state, blocking
//! one-shot runs, and the singleton interactive session.

pub mod job;
pub mod one_shot;
pub mod session;
pub mod supervisor;
