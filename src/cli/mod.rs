//! Command-line interface for jobmill.
//!
//! Provides the `bench` and `cron` commands.

mod commands;

pub use commands::{execute_bench, parse_cli, run, run_with_cli, BenchArgs, BenchReport, Cli};
