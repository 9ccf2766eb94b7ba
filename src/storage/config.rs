//! Configuration file loading and resolution.
//!
//! Loads configuration from `<config dir>/config.toml`, for example
//! `~/.config/quotaprobe/config.toml` on Linux.
//!
//! ## Precedence
//!
//! Settings are resolved with the following precedence (highest first):
//! 1. CLI flags
//! 2. Environment variables
//! 3. Config file
//! 4. Built-in defaults
//!
//! ## Environment Variables
//!
//! - `QUOTAPROBE_PROVIDERS`: Comma-separated provider list (e.g., "claude,codex")
//! - `QUOTAPROBE_TIMEOUT`: Probe timeout in seconds
//! - `QUOTAPROBE_CONFIG`: Override config file path
//!
//! ## Example
//!
//! ```toml
//! [general]
//! timeout_seconds = 30
//!
//! [providers.gemini]
//! binary = "/opt/homebrew/bin/gemini"
//!
//! [providers.zai]
//! enabled = false
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::core::provider::{DEFAULT_PROBE_TIMEOUT, ProbeSettings, Provider};
use crate::error::{QuotaProbeError, Result};

// =============================================================================
// Environment Variable Names
// =============================================================================

/// Environment variable for comma-separated provider list.
pub const ENV_PROVIDERS: &str = "QUOTAPROBE_PROVIDERS";
/// Environment variable for timeout in seconds.
pub const ENV_TIMEOUT: &str = "QUOTAPROBE_TIMEOUT";
/// Environment variable to override config file path.
pub const ENV_CONFIG: &str = "QUOTAPROBE_CONFIG";

/// Accepted timeout range, in seconds.
pub const TIMEOUT_RANGE: std::ops::RangeInclusive<u64> = 1..=300;

// =============================================================================
// File Configuration
// =============================================================================

/// Application configuration as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings.
    pub general: GeneralConfig,
    /// Per-provider settings keyed by provider id.
    pub providers: BTreeMap<String, ProviderSettings>,
}

/// General application settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Default probe timeout in seconds.
    pub timeout_seconds: u64,
    /// Default log level (error, warn, info, debug, trace).
    pub log_level: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: DEFAULT_PROBE_TIMEOUT.as_secs(),
            log_level: None,
        }
    }
}

/// Settings for a specific provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Whether this provider is probed.
    pub enabled: bool,
    /// Binary name or absolute path.
    pub binary: Option<String>,
    /// Per-provider timeout in seconds.
    pub timeout_seconds: Option<u64>,
    /// HTTP endpoint override.
    pub endpoint: Option<String>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: None,
            timeout_seconds: None,
            endpoint: None,
        }
    }
}

impl Config {
    /// Load configuration from the default config file path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Only if the file exists but is invalid.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from a specific path.
    ///
    /// Returns default config if the file doesn't exist.
    ///
    /// # Errors
    ///
    /// Only if the file exists but is unreadable or invalid.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "Config file not found, using defaults");
            return Ok(Self::default());
        }

        tracing::debug!(?path, "Loading config file");
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse TOML content.
    ///
    /// # Errors
    ///
    /// [`QuotaProbeError::Config`] on invalid TOML.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| QuotaProbeError::Config(format!("Invalid config file: {e}")))
    }

    /// Get the config file path.
    #[must_use]
    pub fn config_path() -> PathBuf {
        AppPaths::new().config_file()
    }

    /// Settings for `provider`, defaults when the file has no section.
    #[must_use]
    pub fn provider(&self, provider: Provider) -> ProviderSettings {
        self.providers
            .get(provider.id())
            .cloned()
            .unwrap_or_default()
    }

    /// Validate configuration values.
    ///
    /// Checks that:
    /// - Provider section names are known provider ids
    /// - Timeouts are within 1-300 seconds
    ///
    /// # Errors
    ///
    /// [`QuotaProbeError::Config`] describing the first problem.
    pub fn validate(&self) -> Result<()> {
        for (name, settings) in &self.providers {
            Provider::from_id(name).map_err(|_| {
                QuotaProbeError::Config(format!(
                    "Invalid provider \"{name}\" in [providers]. Valid providers: {}",
                    Provider::valid_ids()
                ))
            })?;
            if let Some(secs) = settings.timeout_seconds {
                validate_timeout(secs)?;
            }
        }
        validate_timeout(self.general.timeout_seconds)
    }
}

fn validate_timeout(secs: u64) -> Result<()> {
    if TIMEOUT_RANGE.contains(&secs) {
        Ok(())
    } else {
        Err(QuotaProbeError::Config(format!(
            "Timeout must be between {} and {} seconds, got {secs}",
            TIMEOUT_RANGE.start(),
            TIMEOUT_RANGE.end()
        )))
    }
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Where a configuration value came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConfigSource {
    /// Value from CLI flag.
    Cli,
    /// Value from environment variable.
    Env,
    /// Value from config file.
    ConfigFile,
    /// Built-in default.
    #[default]
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI flag"),
            Self::Env => write!(f, "environment variable"),
            Self::ConfigFile => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Tracks the source of each configuration value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigSources {
    pub providers: ConfigSource,
    pub timeout: ConfigSource,
    pub config_path: ConfigSource,
}

/// Values supplied on the command line.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    /// Provider ids; empty means "not given".
    pub providers: Vec<String>,
    pub timeout_seconds: Option<u64>,
    pub config_path: Option<PathBuf>,
}

/// Fully resolved configuration after merging CLI, env vars, and config file.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Providers to probe, in catalogue order.
    pub providers: Vec<Provider>,
    /// Probe timeout.
    pub timeout: Duration,
    /// File contents (per-provider settings live here).
    pub file: Config,
    /// Config file that was consulted.
    pub config_path: PathBuf,
    /// Source of each setting for debugging.
    pub sources: ConfigSources,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            providers: Provider::ALL.to_vec(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            file: Config::default(),
            config_path: Config::config_path(),
            sources: ConfigSources::default(),
        }
    }
}

impl ResolvedConfig {
    /// Resolve from CLI overrides, the process environment, and the config file.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The config file exists but is invalid
    /// - Any resolved value is invalid (unknown provider, timeout out of range)
    /// - An explicitly requested provider is disabled in the file
    pub fn resolve(cli: &CliOverrides) -> Result<Self> {
        Self::resolve_with(cli, |key| std::env::var(key).ok())
    }

    /// Like [`ResolvedConfig::resolve`] with an injectable environment lookup.
    ///
    /// # Errors
    ///
    /// See [`ResolvedConfig::resolve`].
    pub fn resolve_with(cli: &CliOverrides, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut sources = ConfigSources::default();

        let config_path = Self::resolve_config_path(cli, &env, &mut sources.config_path);
        let file = Config::load_from(&config_path)?;
        file.validate()?;
        let file_loaded = config_path.exists();

        let providers = Self::resolve_providers(cli, &env, &file, file_loaded, &mut sources.providers)?;
        let timeout = Self::resolve_timeout(cli, &env, &file, file_loaded, &mut sources.timeout)?;

        tracing::debug!(
            providers = ?providers,
            timeout_secs = timeout.as_secs(),
            providers_source = %sources.providers,
            timeout_source = %sources.timeout,
            "configuration resolved"
        );

        Ok(Self {
            providers,
            timeout,
            file,
            config_path,
            sources,
        })
    }

    fn resolve_config_path(
        cli: &CliOverrides,
        env: &impl Fn(&str) -> Option<String>,
        source: &mut ConfigSource,
    ) -> PathBuf {
        if let Some(path) = &cli.config_path {
            *source = ConfigSource::Cli;
            return path.clone();
        }
        if let Some(path) = env(ENV_CONFIG).filter(|p| !p.is_empty()) {
            *source = ConfigSource::Env;
            return PathBuf::from(path);
        }
        *source = ConfigSource::Default;
        Config::config_path()
    }

    fn resolve_providers(
        cli: &CliOverrides,
        env: &impl Fn(&str) -> Option<String>,
        file: &Config,
        file_loaded: bool,
        source: &mut ConfigSource,
    ) -> Result<Vec<Provider>> {
        // 1. CLI --provider flags
        if !cli.providers.is_empty() {
            *source = ConfigSource::Cli;
            return Self::requested(cli.providers.iter().map(String::as_str), file);
        }

        // 2. Environment variable
        if let Some(list) = env(ENV_PROVIDERS).filter(|v| !v.trim().is_empty()) {
            *source = ConfigSource::Env;
            return Self::requested(list.split(','), file);
        }

        // 3. Every provider the file leaves enabled
        *source = if file_loaded {
            ConfigSource::ConfigFile
        } else {
            ConfigSource::Default
        };
        Ok(Provider::ALL
            .iter()
            .copied()
            .filter(|p| file.provider(*p).enabled)
            .collect())
    }

    /// Parse explicitly requested ids, rejecting disabled ones, deduplicated
    /// into catalogue order.
    fn requested<'a>(ids: impl Iterator<Item = &'a str>, file: &Config) -> Result<Vec<Provider>> {
        let mut providers = Vec::new();
        for id in ids.map(str::trim).filter(|id| !id.is_empty()) {
            let provider = Provider::from_id(id)?;
            if !file.provider(provider).enabled {
                return Err(QuotaProbeError::ProviderDisabled(provider.id().to_string()));
            }
            providers.push(provider);
        }
        providers.sort();
        providers.dedup();
        Ok(providers)
    }

    fn resolve_timeout(
        cli: &CliOverrides,
        env: &impl Fn(&str) -> Option<String>,
        file: &Config,
        file_loaded: bool,
        source: &mut ConfigSource,
    ) -> Result<Duration> {
        // 1. CLI --timeout flag
        if let Some(secs) = cli.timeout_seconds {
            validate_timeout(secs)?;
            *source = ConfigSource::Cli;
            return Ok(Duration::from_secs(secs));
        }

        // 2. Environment variable; unparseable values are ignored
        if let Some(secs) = env(ENV_TIMEOUT).and_then(|v| v.trim().parse::<u64>().ok()) {
            validate_timeout(secs)?;
            *source = ConfigSource::Env;
            return Ok(Duration::from_secs(secs));
        }

        // 3. Config file
        *source = if file_loaded {
            ConfigSource::ConfigFile
        } else {
            ConfigSource::Default
        };
        Ok(Duration::from_secs(file.general.timeout_seconds))
    }

    /// Whether `provider` should get a probe at all.
    #[must_use]
    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.file.provider(provider).enabled
    }

    /// Timeout for one provider. A CLI or environment timeout applies to
    /// every provider; otherwise a per-provider file setting beats the
    /// general one.
    #[must_use]
    pub fn provider_timeout(&self, provider: Provider) -> Duration {
        if matches!(self.sources.timeout, ConfigSource::Cli | ConfigSource::Env) {
            return self.timeout;
        }
        self.file
            .provider(provider)
            .timeout_seconds
            .map_or(self.timeout, Duration::from_secs)
    }

    /// Probe inputs for `provider`.
    #[must_use]
    pub fn probe_settings(&self, provider: Provider) -> ProbeSettings {
        let file = self.file.provider(provider);
        let mut settings =
            ProbeSettings::defaults(provider).with_timeout(self.provider_timeout(provider));
        if let Some(binary) = file.binary {
            settings = settings.with_binary(binary);
        }
        if let Some(endpoint) = file.endpoint {
            settings = settings.with_endpoint(endpoint);
        }
        settings
    }
}
