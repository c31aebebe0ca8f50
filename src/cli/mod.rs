//! Command-line interface for crawlq.
//!
//! Thin inspection and scheduling tool over the queue store; the real
//! control surface (job cancellation over HTTP, process management) lives
//! in the host service.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
