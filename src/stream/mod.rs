//! Agent process stream handling.
//!
//! Everything between a spawned agent process and the relay's consumer
//! loop lives here:
//! - `spawner`: argument vectors, process spawning and termination.
//! - `pump`: one task per process forwarding output and the exit status.
//! - `framer`: chunk-to-line reassembly.
//! - `decoder`: line-to-event decoding.
//! - `writer`: input forwarding for the interactive session.

pub mod decoder;
pub mod framer;
pub mod pump;
pub mod spawner;
pub mod writer;
