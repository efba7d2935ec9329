// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

use crate::types::FailurePolicy;

/// Command-line arguments for `etldag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "etldag",
    version,
    about = "Run an ETL pipeline as a DAG of dependent tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the pipeline config file (TOML).
    #[arg(long, value_name = "PATH", default_value = "Pipeline.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ETLDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate, print the resolved plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Force a task to fail (repeatable).
    #[arg(long = "fail", value_name = "TASK")]
    pub fail: Vec<String>,

    /// Override `[config].failure_policy` ("cascade" or "continue").
    #[arg(long, value_name = "POLICY")]
    pub policy: Option<FailurePolicy>,

    /// Override `[config].max_workers`.
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,

    /// Print the final run snapshot as JSON.
    #[arg(long)]
    pub json: bool,

    /// Don't print live task events.
    #[arg(long, short)]
    pub quiet: bool,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_are_parsed() {
        let args = CliArgs::try_parse_from([
            "etldag", "--fail", "extract_data", "--fail", "load_to_mongodb", "--policy",
            "continue", "--workers", "4", "--json",
        ])
        .unwrap();
        assert_eq!(args.config, "Pipeline.toml");
        assert_eq!(args.fail, vec!["extract_data", "load_to_mongodb"]);
        assert_eq!(args.policy, Some(FailurePolicy::ContinueOnError));
        assert_eq!(args.workers, Some(4));
        assert!(args.json);
    }

    #[test]
    fn zero_workers_is_rejected() {
        assert!(CliArgs::try_parse_from(["etldag", "--workers", "0"]).is_err());
    }
}
