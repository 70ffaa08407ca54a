// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::types::CancelMode;

/// Command-line arguments for `triagerun`.
#[derive(Debug, Clone, Default, Parser)]
#[command(
    name = "triagerun",
    version,
    about = "Provision and run forensic triage tools over a collected image.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML).
    ///
    /// Default: `Triagerun.toml` in the current working directory, if present.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Root directory of the collected triage image (e.g. `D:/triage/C`).
    #[arg(long, value_name = "DIR")]
    pub triage_root: Option<PathBuf>,

    /// Memory image for memory-analysis tools.
    #[arg(long, value_name = "FILE")]
    pub memory_image: Option<PathBuf>,

    /// Output root directory.
    #[arg(long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Tool to run (repeatable). Overrides `[run].tools`.
    #[arg(long = "tool", value_name = "NAME")]
    pub tools: Vec<String>,

    /// Run every tool in the catalog.
    #[arg(long, conflicts_with = "tools")]
    pub all: bool,

    /// Module for the selected memory-analysis tools (repeatable).
    #[arg(long = "module", value_name = "NAME")]
    pub modules: Vec<String>,

    /// Maximum number of tasks in the Running phase.
    #[arg(long, value_name = "N")]
    pub max_running: Option<usize>,

    /// Maximum number of tasks in the Provisioning phase.
    #[arg(long, value_name = "N")]
    pub max_provisioning: Option<usize>,

    /// What Ctrl-C does to running tools.
    #[arg(long, value_enum, value_name = "MODE")]
    pub cancel_mode: Option<CancelModeArg>,

    /// List the catalog and exit.
    #[arg(long)]
    pub list: bool,

    /// Resolve the selection and print the plan, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `TRIAGERUN_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Also write logs to this file.
    #[arg(long, value_name = "PATH")]
    pub log_file: Option<PathBuf>,
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

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum CancelModeArg {
    Drain,
    Terminate,
}

impl From<CancelModeArg> for CancelMode {
    fn from(arg: CancelModeArg) -> Self {
        match arg {
            CancelModeArg::Drain => CancelMode::Drain,
            CancelModeArg::Terminate => CancelMode::Terminate,
        }
    }
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeatable_flags_collect() {
        let args = CliArgs::try_parse_from([
            "triagerun",
            "--tool",
            "PECmd",
            "--tool",
            "Volatility3",
            "--module",
            "pslist",
            "--module",
            "netscan",
            "--cancel-mode",
            "terminate",
        ])
        .unwrap();

        assert_eq!(args.tools, vec!["PECmd", "Volatility3"]);
        assert_eq!(args.modules, vec!["pslist", "netscan"]);
        assert_eq!(args.cancel_mode.map(CancelMode::from), Some(CancelMode::Terminate));
        assert!(args.config.is_none());
    }

    #[test]
    fn all_conflicts_with_tool() {
        assert!(CliArgs::try_parse_from(["triagerun", "--all", "--tool", "PECmd"]).is_err());
    }
}
