//! Line-delimited JSON-RPC over a child process's stdio.
//!
//! Used as the fast path for CLIs that ship a server sub-mode. The client
//! owns its child process: [`StdioRpcClient::shutdown`] kills it, and so does
//! dropping the client (`kill_on_drop`), which covers cancellation.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::core::models::{QuotaType, UsageQuota};
use crate::error::ProbeError;

/// Per-request bound on waiting for a response line.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(10);

const JSONRPC_VERSION: &str = "2.0";

/// How long `shutdown` waits for the child to be reaped after killing it.
const REAP_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// Wire Types
// =============================================================================

/// Outgoing request or notification (no `id`).
#[derive(Debug, Clone, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    #[must_use]
    pub fn call(id: u64, method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: Some(Value::from(id)),
            method: method.to_string(),
            params,
        }
    }

    #[must_use]
    pub fn notification(method: &str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id: None,
            method: method.to_string(),
            params,
        }
    }
}

/// Any incoming line: a response, a server notification, or a server request.
#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcMessage {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcMessage {
    /// Responses carry an id and no method.
    fn is_response_to(&self, id: u64) -> bool {
        self.method.is_none() && self.id.as_ref().and_then(Value::as_u64) == Some(id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

// =============================================================================
// Errors
// =============================================================================

/// Why an RPC exchange failed. Callers fall back to the PTY path on any of
/// these, so they carry detail for logs rather than for users.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("binary not found: {0}")]
    BinaryNotFound(String),

    #[error("failed to spawn server: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("server closed the connection")]
    Closed,

    #[error("server error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("client already shut down")]
    ShutDown,
}

impl From<RpcError> for ProbeError {
    fn from(err: RpcError) -> Self {
        match err {
            RpcError::BinaryNotFound(name) => Self::BinaryNotFound(name),
            RpcError::Timeout(_) => Self::Timeout,
            RpcError::Protocol(detail) => Self::ParseFailed(detail),
            other => Self::ExecutionFailed(other.to_string()),
        }
    }
}

// =============================================================================
// Rate Limits
// =============================================================================

/// One usage window reported by the server.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitWindow {
    pub used_percent: f64,
    pub window_minutes: Option<i64>,
    pub resets_at: Option<DateTime<Utc>>,
    pub reset_description: Option<String>,
}

/// Result of a rate-limit read. Either window may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimits {
    pub primary: Option<RateLimitWindow>,
    pub secondary: Option<RateLimitWindow>,
    pub plan_type: Option<String>,
}

impl RateLimits {
    /// Map windows to quotas: primary is the session window, secondary the
    /// weekly one. Remaining percentage is clamped to `0..=100`.
    ///
    /// # Errors
    ///
    /// [`ProbeError::ParseFailed`] when neither window is present.
    pub fn to_quotas(&self, provider_id: &str) -> Result<Vec<UsageQuota>, ProbeError> {
        let quotas: Vec<UsageQuota> = [
            (QuotaType::Session, self.primary.as_ref()),
            (QuotaType::Weekly, self.secondary.as_ref()),
        ]
        .into_iter()
        .filter_map(|(quota_type, window)| {
            window.map(|w| {
                UsageQuota::from_used(quota_type, w.used_percent, provider_id)
                    .with_resets_at(w.resets_at)
                    .with_reset_text(w.reset_description.clone())
            })
        })
        .collect();

        if quotas.is_empty() {
            return Err(ProbeError::ParseFailed(
                "rate limit response contained no windows".to_string(),
            ));
        }
        Ok(quotas)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitsResult {
    #[serde(default)]
    rate_limits: Option<WireRateLimits>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRateLimits {
    #[serde(default)]
    primary: Option<WireWindow>,
    #[serde(default)]
    secondary: Option<WireWindow>,
    #[serde(default)]
    plan_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireWindow {
    used_percent: f64,
    #[serde(default)]
    window_duration_mins: Option<i64>,
    #[serde(default)]
    resets_at: Option<WireTimestamp>,
}

/// Servers have sent both epoch seconds and RFC 3339 strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireTimestamp {
    Epoch(i64),
    Text(String),
}

impl WireTimestamp {
    fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Epoch(secs) => DateTime::from_timestamp(*secs, 0),
            Self::Text(text) => DateTime::parse_from_rfc3339(text)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
        }
    }
}

/// Human reset text relative to `now`, e.g. "Resets in 2h 5m".
#[must_use]
pub fn describe_reset(resets_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (resets_at - now).num_seconds();
    if secs <= 0 {
        return "Resets now".to_string();
    }
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let minutes = (secs % 3_600) / 60;
    let body = match (days, hours, minutes) {
        (0, 0, m) => format!("{}m", m.max(1)),
        (0, h, m) => format!("{h}h {m}m"),
        (d, h, _) => format!("{d}d {h}h"),
    };
    format!("Resets in {body}")
}

/// Decode an `account/rateLimits/read` result.
///
/// # Errors
///
/// [`RpcError::Protocol`] when the payload does not have the expected shape.
pub fn parse_rate_limits(result: Value, now: DateTime<Utc>) -> Result<RateLimits, RpcError> {
    let decoded: RateLimitsResult =
        serde_json::from_value(result).map_err(|e| RpcError::Protocol(e.to_string()))?;
    let Some(wire) = decoded.rate_limits else {
        return Ok(RateLimits::default());
    };

    let convert = |w: WireWindow| {
        let resets_at = w.resets_at.as_ref().and_then(WireTimestamp::to_datetime);
        RateLimitWindow {
            used_percent: w.used_percent,
            window_minutes: w.window_duration_mins,
            resets_at,
            reset_description: resets_at.map(|at| describe_reset(at, now)),
        }
    };

    Ok(RateLimits {
        primary: wire.primary.map(convert),
        secondary: wire.secondary.map(convert),
        plan_type: wire.plan_type,
    })
}

// =============================================================================
// Client
// =============================================================================

/// Rate-limit capable RPC session. Implemented by [`StdioRpcClient`]; tests
/// substitute scripted sessions.
#[async_trait]
pub trait RateLimitRpc: Send {
    /// Perform the initialize handshake.
    async fn initialize(&mut self) -> Result<(), RpcError>;

    /// Issue one rate-limit read.
    async fn fetch_rate_limits(&mut self) -> Result<RateLimits, RpcError>;

    /// Terminate the server. Idempotent and infallible.
    async fn shutdown(&mut self);
}

/// JSON-RPC client speaking to a spawned server over stdin/stdout.
#[derive(Debug)]
pub struct StdioRpcClient {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<Lines<BufReader<ChildStdout>>>,
    next_id: u64,
    timeout: Duration,
    client_name: String,
}

impl StdioRpcClient {
    /// Spawn `program args...` with piped stdio.
    ///
    /// # Errors
    ///
    /// [`RpcError::Spawn`] if the process cannot be started.
    pub fn spawn(program: &Path, args: &[&str], timeout: Duration) -> Result<Self, RpcError> {
        tracing::debug!(program = %program.display(), ?args, "spawning RPC server");

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| RpcError::Spawn(e.to_string()))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(|out| BufReader::new(out).lines());

        Ok(Self {
            child: Some(child),
            stdin,
            stdout,
            next_id: 1,
            timeout,
            client_name: env!("CARGO_PKG_NAME").to_string(),
        })
    }

    async fn write_message(&mut self, message: &JsonRpcRequest) -> Result<(), RpcError> {
        let stdin = self.stdin.as_mut().ok_or(RpcError::ShutDown)?;
        let mut line = serde_json::to_string(message).map_err(|e| RpcError::Protocol(e.to_string()))?;
        line.push('\n');
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|e| RpcError::Io(e.to_string()))?;
        stdin.flush().await.map_err(|e| RpcError::Io(e.to_string()))
    }

    /// Send a request and wait for the response with the same id.
    /// Notifications and unrelated lines in between are skipped.
    ///
    /// # Errors
    ///
    /// Any [`RpcError`]; a JSON-RPC error object becomes [`RpcError::Remote`].
    pub async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        let id = self.next_id;
        self.next_id += 1;
        self.write_message(&JsonRpcRequest::call(id, method, params)).await?;

        let timeout = self.timeout;
        let stdout = self.stdout.as_mut().ok_or(RpcError::ShutDown)?;
        let wait = async {
            loop {
                let line = stdout
                    .next_line()
                    .await
                    .map_err(|e| RpcError::Io(e.to_string()))?
                    .ok_or(RpcError::Closed)?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let Ok(message) = serde_json::from_str::<JsonRpcMessage>(trimmed) else {
                    tracing::trace!(line = trimmed, "skipping non-JSON line");
                    continue;
                };
                if !message.is_response_to(id) {
                    tracing::trace!(method = ?message.method, "skipping unrelated message");
                    continue;
                }
                if let Some(err) = message.error {
                    return Err(RpcError::Remote {
                        code: err.code,
                        message: err.message,
                    });
                }
                return Ok(message.result.unwrap_or(Value::Null));
            }
        };

        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| RpcError::Timeout(timeout))?
    }

    /// Send a notification; no response is expected.
    ///
    /// # Errors
    ///
    /// I/O failures writing to the server.
    pub async fn notify(&mut self, method: &str, params: Option<Value>) -> Result<(), RpcError> {
        self.write_message(&JsonRpcRequest::notification(method, params))
            .await
    }
}

#[async_trait]
impl RateLimitRpc for StdioRpcClient {
    async fn initialize(&mut self) -> Result<(), RpcError> {
        let params = json!({
            "clientInfo": {
                "name": self.client_name,
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        self.request("initialize", Some(params)).await?;
        self.notify("initialized", None).await?;
        tracing::debug!("RPC handshake complete");
        Ok(())
    }

    async fn fetch_rate_limits(&mut self) -> Result<RateLimits, RpcError> {
        let result = self.request("account/rateLimits/read", None).await?;
        parse_rate_limits(result, Utc::now())
    }

    async fn shutdown(&mut self) {
        self.stdin = None;
        self.stdout = None;
        let Some(mut child) = self.child.take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            tracing::debug!(error = %e, "RPC server already exited");
        }
        if tokio::time::timeout(REAP_TIMEOUT, child.wait()).await.is_err() {
            tracing::warn!("RPC server did not exit after kill");
        }
    }
}

/// Starts RPC sessions. Probes hold one of these rather than a session, since
/// every probe spawns its own server.
pub trait RpcLauncher: Send + Sync {
    /// Start `program args...` in server mode.
    ///
    /// # Errors
    ///
    /// [`RpcError::Spawn`] if the server cannot be started.
    fn launch(
        &self,
        program: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Box<dyn RateLimitRpc>, RpcError>;
}

/// [`RpcLauncher`] producing [`StdioRpcClient`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdioRpcLauncher;

impl RpcLauncher for StdioRpcLauncher {
    fn launch(
        &self,
        program: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<Box<dyn RateLimitRpc>, RpcError> {
        Ok(Box::new(StdioRpcClient::spawn(program, args, timeout)?))
    }
}
