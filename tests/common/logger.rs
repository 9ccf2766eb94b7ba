//! Phase-tracking logger for integration tests.
#![allow(dead_code)]
//!
//! Writes one line per event to stderr (visible with `--nocapture`), tagged
//! with the test name, the current phase and elapsed time.
//!
//! ```rust,ignore
//! let log = TestLogger::new("codex_falls_back_to_pty");
//! log.phase("setup");
//! log.phase("probe");
//! log.outcome(&outcome);
//! log.finish_ok();
//! ```
//!
//! # Environment Variables
//!
//! - `TEST_LOG_LEVEL` - trace, debug, info, warn, error (default: info)
//! - `TEST_LOG_JSON` - "1" or "true" for one JSON object per line

use std::env;
use std::sync::{Mutex, OnceLock};
use std::time::Instant;

use chrono::{DateTime, Utc};
use quotaprobe::core::pipeline::ProbeOutcome;
use serde::Serialize;

use super::log_capture::TestLogCapture;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Some(Self::Trace),
            "debug" => Some(Self::Debug),
            "info" => Some(Self::Info),
            "warn" | "warning" => Some(Self::Warn),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize)]
struct LogEntry<'a> {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    test: &'a str,
    phase: &'a str,
    elapsed_ms: u64,
    message: &'a str,
}

struct Settings {
    min_level: LogLevel,
    json: bool,
}

fn settings() -> &'static Settings {
    static SETTINGS: OnceLock<Settings> = OnceLock::new();
    SETTINGS.get_or_init(|| Settings {
        min_level: env::var("TEST_LOG_LEVEL")
            .ok()
            .and_then(|s| LogLevel::parse(&s))
            .unwrap_or(LogLevel::Info),
        json: env::var("TEST_LOG_JSON").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
    })
}

/// Per-test logger with phase and duration tracking.
pub struct TestLogger {
    test_name: String,
    start: Instant,
    phase: Mutex<String>,
}

impl TestLogger {
    pub fn new(test_name: &str) -> Self {
        let logger = Self {
            test_name: test_name.to_string(),
            start: Instant::now(),
            phase: Mutex::new("init".to_string()),
        };
        logger.log(LogLevel::Info, "test starting");
        logger
    }

    /// Logger plus a capture of the crate's tracing output.
    pub fn with_capture(test_name: &str) -> (Self, TestLogCapture) {
        let capture = TestLogCapture::start();
        (Self::new(test_name), capture)
    }

    pub fn phase(&self, phase: &str) {
        if let Ok(mut current) = self.phase.lock() {
            *current = phase.to_string();
        }
        self.log(LogLevel::Debug, &format!("phase: {phase}"));
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    /// Summarize one probe outcome.
    pub fn outcome(&self, outcome: &ProbeOutcome) {
        match &outcome.result {
            Ok(snapshot) => self.info(&format!(
                "{} ok in {}ms: {} quota(s), cost={}",
                outcome.provider,
                outcome.duration_ms,
                snapshot.quotas.len(),
                snapshot.cost_usage.is_some()
            )),
            Err(e) => self.warn(&format!(
                "{} failed in {}ms: [{}] {e}",
                outcome.provider,
                outcome.duration_ms,
                e.error_code()
            )),
        }
    }

    /// Raw transcript, at trace level.
    pub fn transcript(&self, label: &str, text: &str) {
        self.log(LogLevel::Trace, &format!("{label}:\n{text}"));
    }

    pub fn finish_ok(&self) {
        self.log(LogLevel::Info, "test passed");
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn log(&self, level: LogLevel, message: &str) {
        let settings = settings();
        if level < settings.min_level {
            return;
        }
        let phase = self
            .phase
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default();

        if settings.json {
            let entry = LogEntry {
                timestamp: Utc::now(),
                level,
                test: &self.test_name,
                phase: &phase,
                elapsed_ms: self.elapsed_ms(),
                message,
            };
            if let Ok(line) = serde_json::to_string(&entry) {
                eprintln!("{line}");
            }
        } else {
            eprintln!(
                "[{level:?}] {} ({phase}, +{}ms) {message}",
                self.test_name,
                self.elapsed_ms()
            );
        }
    }
}
