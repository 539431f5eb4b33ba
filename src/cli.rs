// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, Subcommand, ValueEnum};

/// Command-line arguments for `lockdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "lockdag",
    version,
    about = "Inspect and maintain the persistent lock-aware job store.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Lockdag.toml` in the current working directory. A missing
    /// default file means "all defaults".
    #[arg(long, value_name = "PATH", default_value = "Lockdag.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `LOCKDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Parse + validate the config and print the effective settings.
    Validate,
    /// List persisted jobs, newest first.
    Jobs,
    /// Show one job and its tasks in dependency order.
    Show {
        /// Job id as printed by `jobs`.
        job_id: i64,
    },
    /// Mark jobs left in flight by a previous process as failed.
    Recover,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
