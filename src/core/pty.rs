//! Pseudo-terminal process runner.
//!
//! The target CLIs change their output (or refuse to run) when stdout is not a
//! terminal, so they are launched attached to a PTY. While the process runs,
//! its output is scanned for interactive prompts that a [`TriggerTable`]
//! answers automatically.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use portable_pty::{CommandBuilder, PtySize, native_pty_system};
use thiserror::Error;

use crate::core::ansi;
use crate::error::ProbeError;
use crate::storage::paths::AppPaths;

/// Default timeout for interactive CLI runs.
pub const PTY_TIMEOUT: Duration = Duration::from_secs(20);

/// How long a stop marker is allowed to keep printing before the run ends.
pub const DEFAULT_SETTLE: Duration = Duration::from_millis(1500);

/// Initial input is sent once output appears, or after this much silence.
const INPUT_GRACE: Duration = Duration::from_millis(750);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Quiet period used to drain output after the child exits.
const DRAIN_QUIET: Duration = Duration::from_millis(100);

/// Raw bytes before each new chunk that are scanned again, on top of the
/// longest needle, so prompts split across reads or broken up by escape
/// sequences are still found.
const SCAN_OVERLAP: usize = 256;

const PTY_ROWS: u16 = 50;
const PTY_COLS: u16 = 160;

// =============================================================================
// Trigger Table
// =============================================================================

#[derive(Debug, Clone)]
struct Trigger {
    needle: String,
    response: String,
    answered: bool,
}

/// Prompt substrings and the keystrokes that answer them.
///
/// Each trigger fires at most once per run, so a prompt that is echoed again
/// later in the transcript is not answered twice.
#[derive(Debug, Clone, Default)]
pub struct TriggerTable {
    triggers: Vec<Trigger>,
}

impl TriggerTable {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            triggers: Vec::new(),
        }
    }

    /// Build from `(needle, response)` pairs.
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        pairs
            .iter()
            .fold(Self::new(), |table, (needle, response)| {
                table.with(*needle, *response)
            })
    }

    /// Add a trigger.
    #[must_use]
    pub fn with(mut self, needle: impl Into<String>, response: impl Into<String>) -> Self {
        self.triggers.push(Trigger {
            needle: needle.into(),
            response: response.into(),
            answered: false,
        });
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Responses for triggers that are visible in `text` and not yet answered.
    ///
    /// Returned in the order their needles first appear in `text`; each is
    /// marked answered.
    pub fn scan(&mut self, text: &str) -> Vec<(String, String)> {
        let mut hits: Vec<(usize, usize)> = self
            .triggers
            .iter()
            .enumerate()
            .filter(|(_, t)| !t.answered)
            .filter_map(|(idx, t)| text.find(&t.needle).map(|pos| (pos, idx)))
            .collect();
        hits.sort_unstable();

        hits.into_iter()
            .map(|(_, idx)| {
                let trigger = &mut self.triggers[idx];
                trigger.answered = true;
                (trigger.needle.clone(), trigger.response.clone())
            })
            .collect()
    }

    /// Length in bytes of the longest needle.
    #[must_use]
    pub fn longest_needle(&self) -> usize {
        self.triggers.iter().map(|t| t.needle.len()).max().unwrap_or(0)
    }

    /// Needles answered so far.
    #[must_use]
    pub fn answered(&self) -> Vec<String> {
        self.triggers
            .iter()
            .filter(|t| t.answered)
            .map(|t| t.needle.clone())
            .collect()
    }
}

// =============================================================================
// Request / Result
// =============================================================================

/// One interactive CLI run.
#[derive(Debug, Clone)]
pub struct PtyRequest {
    pub binary: String,
    pub args: Vec<String>,
    /// Written once the terminal has produced output.
    pub initial_input: Option<String>,
    /// Defaults to the shared probe scratch directory.
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
    pub triggers: TriggerTable,
    /// Substrings that mark the interesting output as printed. Once one is
    /// seen (after the initial input went out) the run ends after `settle`.
    pub stop_on: Vec<String>,
    pub settle: Duration,
    pub env: Vec<(String, String)>,
}

impl PtyRequest {
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
            initial_input: None,
            working_dir: None,
            timeout: PTY_TIMEOUT,
            triggers: TriggerTable::new(),
            stop_on: Vec::new(),
            settle: DEFAULT_SETTLE,
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.initial_input = Some(input.into());
        self
    }

    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn triggers(mut self, triggers: TriggerTable) -> Self {
        self.triggers = triggers;
        self
    }

    #[must_use]
    pub fn stop_on<I, S>(mut self, markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop_on.extend(markers.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub const fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Everything a finished run produced.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    /// Raw output, ANSI sequences included.
    pub output: String,
    /// `None` when the run was ended by a stop marker.
    pub exit_code: Option<u32>,
    pub answered: Vec<String>,
    pub stopped_early: bool,
}

impl Transcript {
    /// Output with escape sequences removed.
    #[must_use]
    pub fn clean(&self) -> String {
        ansi::strip(&self.output)
    }
}

/// Why a run produced no transcript.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("binary not found: {0}")]
    BinaryNotFound(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("run cancelled")]
    Cancelled,
}

impl From<RunError> for ProbeError {
    fn from(err: RunError) -> Self {
        match err {
            RunError::BinaryNotFound(name) => Self::BinaryNotFound(name),
            RunError::TimedOut(_) => Self::Timeout,
            RunError::LaunchFailed(reason) => Self::ExecutionFailed(reason),
            RunError::Cancelled => Self::ExecutionFailed("run cancelled".to_string()),
        }
    }
}

// =============================================================================
// Runner
// =============================================================================

/// Launches interactive CLIs. Implemented by [`PortablePtyRunner`]; tests
/// substitute scripted runners.
#[async_trait]
pub trait TerminalRunner: Send + Sync {
    /// Resolve `binary` to an executable path.
    fn locate(&self, binary: &str) -> Option<PathBuf>;

    /// Run to completion, stop marker, or timeout.
    async fn run(&self, request: PtyRequest) -> Result<Transcript, RunError>;
}

/// Resolve a binary name or explicit path.
#[must_use]
pub fn locate_binary(binary: &str) -> Option<PathBuf> {
    let path = Path::new(binary);
    if path.components().count() > 1 {
        return path.is_file().then(|| path.to_path_buf());
    }
    which::which(binary).ok()
}

/// [`TerminalRunner`] backed by the platform PTY.
#[derive(Debug, Clone, Default)]
pub struct PortablePtyRunner {
    scratch_dir: Option<PathBuf>,
}

impl PortablePtyRunner {
    #[must_use]
    pub const fn new() -> Self {
        Self { scratch_dir: None }
    }

    /// Use `dir` instead of the application scratch directory as the default
    /// working directory.
    #[must_use]
    pub fn with_scratch_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            scratch_dir: Some(dir.into()),
        }
    }

    fn default_working_dir(&self) -> Result<PathBuf, RunError> {
        let dir = self
            .scratch_dir
            .clone()
            .unwrap_or_else(|| AppPaths::new().probe_dir());
        AppPaths::ensure_dir(&dir)
            .map_err(|e| RunError::LaunchFailed(format!("scratch dir {}: {e}", dir.display())))?;
        Ok(dir)
    }
}

/// Sets the flag when dropped, so an abandoned run kills its child.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

#[async_trait]
impl TerminalRunner for PortablePtyRunner {
    fn locate(&self, binary: &str) -> Option<PathBuf> {
        locate_binary(binary)
    }

    async fn run(&self, mut request: PtyRequest) -> Result<Transcript, RunError> {
        let program = self
            .locate(&request.binary)
            .ok_or_else(|| RunError::BinaryNotFound(request.binary.clone()))?;

        if request.working_dir.is_none() {
            request.working_dir = Some(self.default_working_dir()?);
        }

        tracing::debug!(
            binary = %program.display(),
            args = ?request.args,
            timeout_ms = request.timeout.as_millis(),
            "launching PTY process"
        );

        let cancel = Arc::new(AtomicBool::new(false));
        let _guard = CancelOnDrop(Arc::clone(&cancel));
        let task = tokio::task::spawn_blocking(move || run_blocking(&program, request, &cancel));

        task.await
            .map_err(|e| RunError::LaunchFailed(format!("runner task failed: {e}")))?
    }
}

fn launch_error(what: &str, err: impl std::fmt::Display) -> RunError {
    RunError::LaunchFailed(format!("{what}: {err}"))
}

fn write_pty(writer: &mut impl Write, bytes: &str) {
    if let Err(e) = writer.write_all(bytes.as_bytes()).and_then(|()| writer.flush()) {
        tracing::debug!(error = %e, "PTY write failed");
    }
}

#[allow(clippy::too_many_lines)]
fn run_blocking(
    program: &Path,
    request: PtyRequest,
    cancel: &AtomicBool,
) -> Result<Transcript, RunError> {
    let PtyRequest {
        args,
        initial_input,
        working_dir,
        timeout,
        mut triggers,
        stop_on,
        settle,
        env,
        ..
    } = request;

    let pair = native_pty_system()
        .openpty(PtySize {
            rows: PTY_ROWS,
            cols: PTY_COLS,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| launch_error("failed to allocate PTY", e))?;

    let mut cmd = CommandBuilder::new(program);
    cmd.args(&args);
    if let Some(dir) = &working_dir {
        cmd.cwd(dir);
    }
    cmd.env("TERM", "xterm-256color");
    for (key, value) in &env {
        cmd.env(key, value);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| launch_error("failed to spawn", e))?;
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| launch_error("failed to get PTY reader", e))?;
    let mut writer = pair
        .master
        .take_writer()
        .map_err(|e| launch_error("failed to get PTY writer", e))?;

    // The reader thread exits on EOF or once the master side is dropped.
    let (tx, rx) = mpsc::channel::<Vec<u8>>();
    std::thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match reader.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(chunk[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });

    let longest_marker = stop_on.iter().map(String::len).max().unwrap_or(0);
    let lookback = triggers.longest_needle().max(longest_marker) * 4 + SCAN_OVERLAP;

    let started = Instant::now();
    let deadline = started + timeout;
    let mut raw: Vec<u8> = Vec::new();
    let mut pending_input = initial_input;
    let mut stop_at: Option<Instant> = None;
    let mut exit_code = None;
    let mut stopped_early = false;

    loop {
        if cancel.load(Ordering::Relaxed) {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!("PTY run cancelled, child killed");
            return Err(RunError::Cancelled);
        }

        let mut received = 0;
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(bytes) => {
                raw.extend_from_slice(&bytes);
                received = bytes.len();
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                exit_code = child.wait().ok().map(|s| s.exit_code());
                break;
            }
        }

        if let Some(input) = pending_input.as_deref()
            && (received > 0 || started.elapsed() >= INPUT_GRACE)
        {
            write_pty(&mut writer, input);
            tracing::trace!(input = ?input, "initial input written");
            pending_input = None;
        }

        if received > 0 {
            let from = raw.len().saturating_sub(received + lookback);
            let text = ansi::strip(&String::from_utf8_lossy(&raw[from..]));
            for (needle, response) in triggers.scan(&text) {
                tracing::debug!(trigger = %needle, "answering prompt");
                write_pty(&mut writer, &response);
            }
            if stop_at.is_none()
                && pending_input.is_none()
                && stop_on.iter().any(|marker| text.contains(marker.as_str()))
            {
                stop_at = Some(Instant::now() + settle);
            }
        }

        if let Ok(Some(status)) = child.try_wait() {
            while let Ok(bytes) = rx.recv_timeout(DRAIN_QUIET) {
                raw.extend_from_slice(&bytes);
            }
            exit_code = Some(status.exit_code());
            break;
        }

        if stop_at.is_some_and(|at| Instant::now() >= at) {
            let _ = child.kill();
            let _ = child.wait();
            stopped_early = true;
            break;
        }

        if Instant::now() >= deadline {
            let _ = child.kill();
            let _ = child.wait();
            tracing::debug!(
                elapsed_ms = started.elapsed().as_millis(),
                bytes = raw.len(),
                "PTY run timed out"
            );
            return Err(RunError::TimedOut(timeout));
        }
    }

    drop(writer);
    drop(pair.master);

    let output = String::from_utf8_lossy(&raw).into_owned();
    tracing::debug!(
        exit_code = ?exit_code,
        stopped_early,
        bytes = output.len(),
        elapsed_ms = started.elapsed().as_millis(),
        "PTY process finished"
    );
    tracing::trace!(transcript = %output, "PTY transcript");

    Ok(Transcript {
        output,
        exit_code,
        answered: triggers.answered(),
        stopped_early,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_fires_once() {
        let mut table = TriggerTable::from_pairs(&[("Do you trust the files in this folder?", "y\r")]);
        let first = table.scan("Do you trust the files in this folder?");
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].1, "y\r");

        let again = table.scan("Do you trust the files in this folder?\n...\nDo you trust the files in this folder?");
        assert!(again.is_empty());
        assert_eq!(table.answered(), vec!["Do you trust the files in this folder?".to_string()]);
    }

    #[test]
    fn triggers_answer_in_first_seen_order() {
        let mut table = TriggerTable::new()
            .with("Press Enter to continue", "\r")
            .with("Ready to code here?", "\r")
            .with("never shown", "x");
        let hits = table.scan("Ready to code here?\n...\nPress Enter to continue");
        let needles: Vec<&str> = hits.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(needles, vec!["Ready to code here?", "Press Enter to continue"]);
        assert_eq!(table.answered().len(), 2);
    }

    #[test]
    fn trigger_split_across_chunks_matches_accumulated_text() {
        let mut table = TriggerTable::new().with("Ready to code here?", "\r");
        assert!(table.scan("Ready to co").is_empty());
        assert_eq!(table.scan("Ready to code here?").len(), 1);
    }

    #[test]
    fn longest_needle_sizes_the_scan_window() {
        assert_eq!(TriggerTable::new().longest_needle(), 0);
        let table = TriggerTable::new()
            .with("Press Enter to continue", "\r")
            .with("Ready?", "\r");
        assert_eq!(table.longest_needle(), "Press Enter to continue".len());
    }

    #[test]
    fn request_builder() {
        let request = PtyRequest::new("claude")
            .args(["/status", "--allowed-tools", ""])
            .input("\r")
            .timeout(Duration::from_secs(5))
            .stop_on(["Login method"])
            .env("NO_COLOR", "1");
        assert_eq!(request.args.len(), 3);
        assert_eq!(request.initial_input.as_deref(), Some("\r"));
        assert_eq!(request.timeout, Duration::from_secs(5));
        assert_eq!(request.stop_on, vec!["Login method".to_string()]);
        assert_eq!(request.settle, DEFAULT_SETTLE);
        assert!(request.working_dir.is_none());
    }

    #[test]
    fn run_errors_map_to_probe_errors() {
        assert_eq!(
            ProbeError::from(RunError::BinaryNotFound("codex".into())),
            ProbeError::BinaryNotFound("codex".into())
        );
        assert_eq!(
            ProbeError::from(RunError::TimedOut(Duration::from_secs(1))),
            ProbeError::Timeout
        );
        assert!(matches!(
            ProbeError::from(RunError::LaunchFailed("boom".into())),
            ProbeError::ExecutionFailed(_)
        ));
    }

    #[test]
    fn locate_missing_binary() {
        assert!(locate_binary("definitely-not-a-real-binary-quotaprobe").is_none());
        assert!(locate_binary("/definitely/not/here/claude").is_none());
    }

    #[test]
    fn transcript_clean_strips_escapes() {
        let transcript = Transcript {
            output: "\x1b[1mCurrent session\x1b[0m".into(),
            ..Transcript::default()
        };
        assert_eq!(transcript.clean(), "Current session");
    }
}
