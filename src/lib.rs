//! quotaprobe - usage quota probing for AI coding CLIs
//!
//! Drives the Claude, Codex and Gemini command-line tools (and the z.ai HTTP
//! API) to read how much of each account's usage quota remains, and
//! normalizes the result into [`UsageSnapshot`](core::models::UsageSnapshot)s.

// Note: deny (not forbid) to allow #[allow(unsafe_code)] in test helpers for env var manipulation
#![deny(unsafe_code)]
#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod core;
pub mod error;
pub mod providers;
pub mod storage;

/// Test utilities module - included in test builds or when test-utils feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use error::{ExitCode, ProbeError, QuotaProbeError, Result};

// Re-export test utilities for external test crates
#[cfg(any(test, feature = "test-utils"))]
pub use test_utils::*;
