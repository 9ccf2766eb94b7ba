//! Shared helpers for integration tests.
//!
//! - `fixtures`: captured CLI transcripts, API bodies and script writers
//! - `log_capture`: a tracing layer for asserting on probe logs
//! - `logger`: phase-tracking test logger

pub mod fixtures;
pub mod log_capture;
pub mod logger;
