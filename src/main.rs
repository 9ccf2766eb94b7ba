//! quotaprobe - usage quota probing for AI coding CLIs
//!
//! CLI entry point.

#![forbid(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;

use quotaprobe::cli::{Cli, Commands};
use quotaprobe::core::logging::{self, LogSettings};
use quotaprobe::core::provider::ProviderRegistry;
use quotaprobe::storage::AppPaths;
use quotaprobe::storage::config::ResolvedConfig;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let resolved = ResolvedConfig::resolve(&cli.overrides());
    let config_level = resolved
        .as_ref()
        .ok()
        .and_then(|c| c.file.general.log_level.clone());
    logging::init(&LogSettings::resolve(&cli.log_args(), config_level.as_deref()));

    match run(cli, resolved).await {
        Ok(code) => ExitCode::from(code as u8),
        Err(e) => {
            tracing::error!(error = %e, error_code = e.error_code(), "command failed");
            eprintln!("quotaprobe: {e} [{}]", e.error_code());
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(
    cli: Cli,
    resolved: quotaprobe::Result<ResolvedConfig>,
) -> quotaprobe::Result<quotaprobe::ExitCode> {
    let config = resolved?;
    let registry = ProviderRegistry::from_config(&config);
    tracing::debug!(
        config = %config.config_path.display(),
        registered = ?registry.providers(),
        "registry built"
    );

    match cli.command {
        Some(Commands::Providers) => {
            quotaprobe::cli::providers::execute(&registry, cli.json, cli.pretty).await?;
            Ok(quotaprobe::ExitCode::Success)
        }
        Some(Commands::Usage(_)) | None => {
            if config.providers.iter().any(|p| p.default_binary().is_some()) {
                let dir = AppPaths::new()
                    .ensure_probe_dir()
                    .context("cannot create probe scratch directory")?;
                tracing::debug!(dir = %dir.display(), "probe directory ready");
            }
            quotaprobe::cli::usage::execute(&config, &registry, cli.json, cli.pretty).await
        }
    }
}
