//! Captured CLI transcripts, API bodies, and helpers that stage them.
#![allow(dead_code)]
//!
//! ```rust,ignore
//! use common::fixtures::*;
//!
//! let usage = load_fixture_text("claude/usage_max.txt");
//! let body = load_fixture_json("gemini/quota.json");
//! ```

use std::fs;
use std::path::{Path, PathBuf};

/// `tests/fixtures` under the crate root.
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

/// # Panics
///
/// Panics if the file cannot be read.
pub fn load_fixture_text(path: &str) -> String {
    let full_path = fixtures_dir().join(path);
    fs::read_to_string(&full_path)
        .unwrap_or_else(|e| panic!("Failed to read fixture {}: {e}", full_path.display()))
}

/// # Panics
///
/// Panics if the file cannot be read or is not JSON.
pub fn load_fixture_json(path: &str) -> serde_json::Value {
    let text = load_fixture_text(path);
    serde_json::from_str(&text).unwrap_or_else(|e| panic!("Failed to parse fixture {path}: {e}"))
}

/// Write an executable `/bin/sh` script into `dir`.
///
/// # Panics
///
/// Panics if the file cannot be written or made executable.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// Wait up to five seconds for `path` to hold a process id.
///
/// # Panics
///
/// Panics if no pid is written in time.
#[cfg(unix)]
pub async fn read_pid_file(path: &Path) -> u32 {
    for _ in 0..100 {
        if let Some(pid) = fs::read_to_string(path)
            .ok()
            .and_then(|text| text.trim().parse().ok())
        {
            return pid;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("no pid written to {}", path.display());
}

/// Whether `pid` is still running. Zombies count as gone.
#[cfg(unix)]
pub fn process_running(pid: u32) -> bool {
    let proc_dir = Path::new("/proc");
    if proc_dir.exists() {
        return fs::read_to_string(proc_dir.join(pid.to_string()).join("stat")).is_ok_and(|stat| {
            // Third field, after the parenthesised command name.
            stat.rsplit_once(')')
                .and_then(|(_, rest)| rest.split_whitespace().next())
                .is_some_and(|state| state != "Z" && state != "X")
        });
    }
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}

/// Wait up to five seconds for `pid` to stop running.
#[cfg(unix)]
pub async fn wait_for_exit(pid: u32) -> bool {
    for _ in 0..100 {
        if !process_running(pid) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    false
}

/// Gemini OAuth credentials file with `token`, expiring `expiry_ms`.
///
/// # Panics
///
/// Panics if the file cannot be written.
pub fn write_gemini_creds(dir: &Path, token: &str, expiry_ms: i64) -> PathBuf {
    let path = dir.join("oauth_creds.json");
    let body = serde_json::json!({
        "access_token": token,
        "refresh_token": "refresh",
        "expiry_date": expiry_ms,
        "token_type": "Bearer",
    });
    fs::write(&path, body.to_string()).expect("write creds");
    path
}
