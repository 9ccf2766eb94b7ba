//! Structured logging to stderr or a log file.
//!
//! Level, format and destination resolve as CLI flag > environment >
//! config file > default. Probes log with structured fields (`provider`,
//! `strategy`, `error`), so the JSON format is the one to pipe elsewhere.

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

pub const LOG_LEVEL_ENV: &str = "QUOTAPROBE_LOG";
pub const LOG_FORMAT_ENV: &str = "QUOTAPROBE_LOG_FORMAT";
pub const LOG_FILE_ENV: &str = "QUOTAPROBE_LOG_FILE";

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable logs.
    #[default]
    Human,
    /// JSON logs (one event per line).
    Json,
    /// Compact logs (single line, terse).
    Compact,
}

impl LogFormat {
    /// Parse from string (case-insensitive).
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "human" => Some(Self::Human),
            "json" => Some(Self::Json),
            "compact" => Some(Self::Compact),
            _ => None,
        }
    }
}

/// Log verbosity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    /// Fallbacks and probe failures are logged at this level.
    #[default]
    Warn,
    Error,
}

impl LogLevel {
    #[must_use]
    pub fn from_arg(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "verbose" | "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" | "critical" => Some(Self::Error),
            _ => None,
        }
    }

    /// Directive for [`EnvFilter`].
    #[must_use]
    pub const fn as_filter(self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Resolved logging setup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSettings {
    pub level: LogLevel,
    pub format: LogFormat,
    pub file: Option<PathBuf>,
}

/// Logging inputs from the command line.
#[derive(Debug, Clone, Default)]
pub struct LogArgs {
    pub level: Option<String>,
    pub format: Option<String>,
    pub verbose: bool,
}

impl LogSettings {
    /// Resolve from CLI arguments, the process environment, and the config
    /// file's `log_level`.
    #[must_use]
    pub fn resolve(args: &LogArgs, config_level: Option<&str>) -> Self {
        Self::resolve_with(args, config_level, |key| std::env::var(key).ok())
    }

    /// [`Self::resolve`] with an injected environment lookup.
    ///
    /// Unparseable values are skipped. `verbose` raises the level to at least
    /// debug.
    #[must_use]
    pub fn resolve_with(
        args: &LogArgs,
        config_level: Option<&str>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Self {
        let env_value = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let mut level = args
            .level
            .as_deref()
            .and_then(LogLevel::from_arg)
            .or_else(|| env_value(LOG_LEVEL_ENV).as_deref().and_then(LogLevel::from_arg))
            .or_else(|| config_level.and_then(LogLevel::from_arg))
            .unwrap_or_default();
        if args.verbose && level > LogLevel::Debug {
            level = LogLevel::Debug;
        }

        let format = args
            .format
            .as_deref()
            .and_then(LogFormat::from_arg)
            .or_else(|| env_value(LOG_FORMAT_ENV).as_deref().and_then(LogFormat::from_arg))
            .unwrap_or_default();

        let file = env_value(LOG_FILE_ENV).map(|v| PathBuf::from(v.trim()));

        Self {
            level,
            format,
            file,
        }
    }
}

/// Install the global subscriber. Later calls are no-ops.
pub fn init(settings: &LogSettings) {
    let file = settings.file.as_ref().and_then(|path| {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| eprintln!("quotaprobe: cannot open log file {}: {e}", path.display()))
            .ok()
    });

    let make_writer = || -> BoxMakeWriter {
        if let Some(file) = file.as_ref().and_then(|inner| inner.try_clone().ok()) {
            BoxMakeWriter::new(file)
        } else {
            BoxMakeWriter::new(std::io::stderr)
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("quotaprobe={}", settings.level.as_filter()))
    });

    let installed = match settings.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_writer(make_writer())
            .with_span_events(FmtSpan::CLOSE)
            .try_init(),
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .compact()
            .with_writer(make_writer())
            .with_target(true)
            .try_init(),
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(make_writer())
            .with_target(false)
            .without_time()
            .try_init(),
    };

    if installed.is_err() {
        tracing::debug!("logging already initialized");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_to_warn_human_stderr() {
        let settings = LogSettings::resolve_with(&LogArgs::default(), None, env_from(&[]));
        assert_eq!(settings, LogSettings::default());
        assert_eq!(settings.level, LogLevel::Warn);
    }

    #[test]
    fn cli_beats_env_beats_config() {
        let env = env_from(&[(LOG_LEVEL_ENV, "info"), (LOG_FORMAT_ENV, "json")]);
        let args = LogArgs {
            level: Some("trace".into()),
            ..LogArgs::default()
        };
        let settings = LogSettings::resolve_with(&args, Some("error"), env);
        assert_eq!(settings.level, LogLevel::Trace);
        assert_eq!(settings.format, LogFormat::Json);

        let settings = LogSettings::resolve_with(
            &LogArgs::default(),
            Some("error"),
            env_from(&[(LOG_LEVEL_ENV, "debug")]),
        );
        assert_eq!(settings.level, LogLevel::Debug);

        let settings = LogSettings::resolve_with(&LogArgs::default(), Some("error"), env_from(&[]));
        assert_eq!(settings.level, LogLevel::Error);
    }

    #[test]
    fn verbose_raises_level_only() {
        let args = LogArgs {
            verbose: true,
            ..LogArgs::default()
        };
        assert_eq!(
            LogSettings::resolve_with(&args, None, env_from(&[])).level,
            LogLevel::Debug
        );

        let args = LogArgs {
            level: Some("trace".into()),
            verbose: true,
            ..LogArgs::default()
        };
        assert_eq!(
            LogSettings::resolve_with(&args, None, env_from(&[])).level,
            LogLevel::Trace
        );
    }

    #[test]
    fn unparseable_values_are_skipped() {
        let env = env_from(&[
            (LOG_LEVEL_ENV, "loud"),
            (LOG_FORMAT_ENV, "xml"),
            (LOG_FILE_ENV, "  /tmp/quotaprobe.log "),
        ]);
        let settings = LogSettings::resolve_with(&LogArgs::default(), None, env);
        assert_eq!(settings.level, LogLevel::Warn);
        assert_eq!(settings.format, LogFormat::Human);
        assert_eq!(settings.file, Some(PathBuf::from("/tmp/quotaprobe.log")));
    }

    #[test]
    fn init_twice_is_harmless() {
        init(&LogSettings::default());
        init(&LogSettings {
            format: LogFormat::Json,
            ..LogSettings::default()
        });
    }
}
