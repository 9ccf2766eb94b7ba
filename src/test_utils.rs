//! Test utilities for quotaprobe.
//!
//! Scripted stand-ins for the process seams, snapshot factories, and an
//! isolated temporary directory.
//!
//! # Usage
//!
//! ```rust,ignore
//! use quotaprobe::test_utils::*;
//!
//! let terminal = ScriptedTerminal::new().on_arg("/status", STATUS_TEXT);
//! let rpc = ScriptedRpcLauncher::new().push(RpcScript::failing_fetch(RpcError::Closed));
//! let dir = TestDir::new();
//! dir.create_file("config.toml", "[general]\ntimeout_seconds = 30");
//! ```

use std::collections::VecDeque;
use std::fs;
use std::io::{self, Write as IoWrite};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::core::models::{QuotaType, UsageQuota, UsageSnapshot};
use crate::core::pty::{PtyRequest, RunError, TerminalRunner, Transcript};
use crate::core::rpc::{RateLimitRpc, RateLimits, RpcError, RpcLauncher};

// =============================================================================
// Test Data Factories
// =============================================================================

/// A snapshot with one session quota at `percent_remaining`.
#[must_use]
pub fn make_test_snapshot(provider_id: &str, percent_remaining: f64) -> UsageSnapshot {
    UsageSnapshot::with_quotas(
        provider_id,
        vec![
            UsageQuota::new(QuotaType::Session, percent_remaining, provider_id)
                .with_reset_text(Some("Resets in 2h".to_string())),
        ],
    )
}

/// Transcript that ended because the process exited with status 0.
#[must_use]
pub fn make_transcript(output: &str) -> Transcript {
    Transcript {
        output: output.to_string(),
        exit_code: Some(0),
        answered: Vec::new(),
        stopped_early: false,
    }
}

// =============================================================================
// Scripted Terminal
// =============================================================================

#[derive(Default)]
struct TerminalScript {
    missing: bool,
    by_first_arg: Vec<(String, Result<Transcript, RunError>)>,
    queue: VecDeque<Result<Transcript, RunError>>,
    requests: Vec<PtyRequest>,
}

/// [`TerminalRunner`] that replays canned transcripts and records every
/// request it receives.
///
/// Responses keyed with [`Self::on_arg`] match on the request's first
/// argument and can be replayed any number of times; queued responses are
/// used once each, in order. Clones share state.
#[derive(Clone, Default)]
pub struct ScriptedTerminal {
    script: Arc<Mutex<TerminalScript>>,
}

impl ScriptedTerminal {
    /// Binary resolvable, no responses scripted yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binary never resolves; every run fails with `BinaryNotFound`.
    #[must_use]
    pub fn missing() -> Self {
        let terminal = Self::new();
        terminal.lock().missing = true;
        terminal
    }

    /// Queue a transcript.
    #[must_use]
    pub fn with_output(self, output: &str) -> Self {
        self.lock().queue.push_back(Ok(make_transcript(output)));
        self
    }

    /// Queue a failure.
    #[must_use]
    pub fn with_error(self, error: RunError) -> Self {
        self.lock().queue.push_back(Err(error));
        self
    }

    /// Answer every request whose first argument is `arg`.
    #[must_use]
    pub fn on_arg(self, arg: &str, output: &str) -> Self {
        self.lock()
            .by_first_arg
            .push((arg.to_string(), Ok(make_transcript(output))));
        self
    }

    /// Fail every request whose first argument is `arg`.
    #[must_use]
    pub fn on_arg_error(self, arg: &str, error: RunError) -> Self {
        self.lock().by_first_arg.push((arg.to_string(), Err(error)));
        self
    }

    /// Requests seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<PtyRequest> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TerminalScript> {
        self.script.lock().expect("terminal script lock")
    }
}

#[async_trait]
impl TerminalRunner for ScriptedTerminal {
    fn locate(&self, binary: &str) -> Option<PathBuf> {
        if self.lock().missing {
            None
        } else {
            Some(PathBuf::from("/usr/local/bin").join(binary))
        }
    }

    async fn run(&self, request: PtyRequest) -> Result<Transcript, RunError> {
        let mut script = self.lock();
        script.requests.push(request.clone());

        if script.missing {
            return Err(RunError::BinaryNotFound(request.binary));
        }

        let first = request.args.first().cloned().unwrap_or_default();
        if let Some((_, response)) = script.by_first_arg.iter().find(|(arg, _)| *arg == first) {
            return response.clone();
        }

        script
            .queue
            .pop_front()
            .unwrap_or_else(|| Err(RunError::LaunchFailed("no scripted response".to_string())))
    }
}

// =============================================================================
// Scripted RPC
// =============================================================================

/// Counts RPC session shutdowns. Clones share the count.
#[derive(Clone, Default, Debug)]
pub struct ShutdownCounter(Arc<AtomicUsize>);

impl ShutdownCounter {
    #[must_use]
    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Behaviour of one scripted RPC session.
#[derive(Debug, Clone)]
pub struct RpcScript {
    pub launch: Result<(), RpcError>,
    pub initialize: Result<(), RpcError>,
    pub fetch: Result<RateLimits, RpcError>,
    /// Delay before the rate-limit read answers.
    pub stall: Duration,
}

impl RpcScript {
    /// Handshake succeeds and the read returns `limits`.
    #[must_use]
    pub const fn returning(limits: RateLimits) -> Self {
        Self {
            launch: Ok(()),
            initialize: Ok(()),
            fetch: Ok(limits),
            stall: Duration::ZERO,
        }
    }

    /// Handshake succeeds but the rate-limit read never answers.
    #[must_use]
    pub fn hanging() -> Self {
        Self {
            stall: Duration::from_secs(3600),
            ..Self::returning(RateLimits::default())
        }
    }

    #[must_use]
    pub fn failing_launch(error: RpcError) -> Self {
        Self {
            launch: Err(error),
            ..Self::returning(RateLimits::default())
        }
    }

    #[must_use]
    pub fn failing_initialize(error: RpcError) -> Self {
        Self {
            initialize: Err(error),
            ..Self::returning(RateLimits::default())
        }
    }

    #[must_use]
    pub fn failing_fetch(error: RpcError) -> Self {
        Self {
            fetch: Err(error),
            ..Self::returning(RateLimits::default())
        }
    }
}

/// [`RpcLauncher`] handing out scripted sessions in order.
///
/// With no script left, launching fails as if the server could not start.
#[derive(Default)]
pub struct ScriptedRpcLauncher {
    scripts: Mutex<VecDeque<RpcScript>>,
    launches: Mutex<Vec<(PathBuf, Vec<String>)>>,
    shutdowns: ShutdownCounter,
}

impl ScriptedRpcLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn push(self, script: RpcScript) -> Self {
        self.scripts
            .lock()
            .expect("rpc script lock")
            .push_back(script);
        self
    }

    /// Counter shared with every session this launcher creates.
    #[must_use]
    pub fn shutdown_counter(&self) -> ShutdownCounter {
        self.shutdowns.clone()
    }

    /// `(program, args)` of every launch attempt.
    #[must_use]
    pub fn launches(&self) -> Vec<(PathBuf, Vec<String>)> {
        self.launches.lock().expect("rpc launch lock").clone()
    }
}

impl RpcLauncher for ScriptedRpcLauncher {
    fn launch(
        &self,
        program: &Path,
        args: &[&str],
        _timeout: Duration,
    ) -> Result<Box<dyn RateLimitRpc>, RpcError> {
        self.launches.lock().expect("rpc launch lock").push((
            program.to_path_buf(),
            args.iter().map(ToString::to_string).collect(),
        ));

        let script = self
            .scripts
            .lock()
            .expect("rpc script lock")
            .pop_front()
            .ok_or_else(|| RpcError::Spawn("no scripted session".to_string()))?;
        script.launch.clone()?;

        Ok(Box::new(ScriptedRpc {
            script,
            shutdowns: self.shutdowns.clone(),
            shut_down: false,
        }))
    }
}

struct ScriptedRpc {
    script: RpcScript,
    shutdowns: ShutdownCounter,
    shut_down: bool,
}

#[async_trait]
impl RateLimitRpc for ScriptedRpc {
    async fn initialize(&mut self) -> Result<(), RpcError> {
        self.script.initialize.clone()
    }

    async fn fetch_rate_limits(&mut self) -> Result<RateLimits, RpcError> {
        if self.shut_down {
            return Err(RpcError::ShutDown);
        }
        if !self.script.stall.is_zero() {
            tokio::time::sleep(self.script.stall).await;
        }
        self.script.fetch.clone()
    }

    async fn shutdown(&mut self) {
        if !self.shut_down {
            self.shut_down = true;
            self.shutdowns.bump();
        }
    }
}

// =============================================================================
// Temporary Directories
// =============================================================================

/// An isolated temporary directory, removed on drop.
///
/// ```rust,ignore
/// use quotaprobe::test_utils::TestDir;
///
/// let dir = TestDir::new();
/// dir.create_file(".gemini/oauth_creds.json", r#"{"access_token": "t"}"#);
/// ```
pub struct TestDir {
    inner: tempfile::TempDir,
}

impl TestDir {
    /// # Panics
    ///
    /// Panics if the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: tempfile::tempdir().expect("Failed to create temp directory"),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// Create a file with `content`, creating parent directories as needed.
    ///
    /// # Panics
    ///
    /// Panics if the file cannot be created or written.
    pub fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.inner.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        let mut file = fs::File::create(&path).expect("Failed to create test file");
        file.write_all(content.as_bytes())
            .expect("Failed to write test file");
        path
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read.
    pub fn read_file(&self, name: &str) -> io::Result<String> {
        fs::read_to_string(self.inner.path().join(name))
    }

    #[must_use]
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.inner.path().join(name)
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Assertion Macros
// =============================================================================

/// Assert approximate floating point equality.
///
/// ```rust,ignore
/// use quotaprobe::assert_float_eq;
///
/// assert_float_eq!(70.0, 70.0000001);
/// assert_float_eq!(70.0, 70.05, 0.1); // Custom epsilon
/// ```
#[macro_export]
macro_rules! assert_float_eq {
    ($left:expr, $right:expr) => {
        $crate::assert_float_eq!($left, $right, f64::EPSILON * 100.0)
    };
    ($left:expr, $right:expr, $epsilon:expr) => {
        let left: f64 = $left;
        let right: f64 = $right;
        let epsilon: f64 = $epsilon;
        assert!(
            (left - right).abs() < epsilon,
            "Float equality assertion failed: {} != {} (epsilon: {})",
            left,
            right,
            epsilon
        );
    };
}
