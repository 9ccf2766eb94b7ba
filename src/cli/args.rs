//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::core::logging::LogArgs;
use crate::storage::config::CliOverrides;

/// Probe AI coding CLIs for remaining usage quota.
#[derive(Parser, Debug)]
#[command(name = "quotaprobe")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    // === Global flags ===
    /// Emit JSON instead of plain text
    #[arg(long, global = true)]
    pub json: bool,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (human, json, compact)
    #[arg(long, value_name = "FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file path
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Logging inputs for [`crate::core::logging::LogSettings::resolve`].
    #[must_use]
    pub fn log_args(&self) -> LogArgs {
        LogArgs {
            level: self.log_level.clone(),
            format: self.log_format.clone(),
            verbose: self.verbose,
        }
    }

    /// Configuration overrides from the command line.
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        let (providers, timeout_seconds) = match &self.command {
            Some(Commands::Usage(args)) => (args.provider.clone(), args.timeout),
            Some(Commands::Providers) | None => (Vec::new(), None),
        };
        CliOverrides {
            providers,
            timeout_seconds,
            config_path: self.config.clone(),
        }
    }
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Probe providers and print their quotas (default command)
    Usage(UsageArgs),

    /// List registered providers and whether each can run
    Providers,
}

/// Arguments for the `usage` command.
#[derive(Parser, Debug, Default)]
pub struct UsageArgs {
    /// Provider to probe; repeat for several (default: all enabled)
    #[arg(long, short = 'p', value_name = "PROVIDER")]
    pub provider: Vec<String>,

    /// Per-probe timeout in seconds (1-300)
    #[arg(long, value_name = "SECONDS")]
    pub timeout: Option<u64>,
}
