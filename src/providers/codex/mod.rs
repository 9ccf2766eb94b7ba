//! Codex (`OpenAI`) provider implementation.
//!
//! Two tiers:
//! 1. JSON-RPC against `codex app-server` (`account/rateLimits/read`)
//! 2. The interactive `/status` screen through a PTY
//!
//! Any RPC failure falls through to the PTY path; only the PTY result is
//! reported to the caller. The RPC tier gets at most half of the probe's
//! budget so a hung app server still leaves time for the fallback.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::core::classify::detect_known_error;
use crate::core::extract::{
    clean_reset_text, extract_email, extract_percent, extract_reset, parse_relative_offset,
};
use crate::core::models::{QuotaType, UsageQuota, UsageSnapshot};
use crate::core::provider::{Deadline, ProbeSettings, Provider, UsageProbe};
use crate::core::pty::{PtyRequest, TerminalRunner, TriggerTable};
use crate::core::rpc::{RPC_TIMEOUT, RateLimits, RpcError, RpcLauncher};
use crate::error::{ProbeError, ProbeResult};

/// Provider id.
pub const PROVIDER_ID: &str = "codex";

/// Sandbox flags shared by both tiers.
const SANDBOX_ARGS: &[&str] = &["-s", "read-only", "-a", "untrusted"];

const SESSION_LABEL: &str = "5h limit";
const WEEKLY_LABEL: &str = "Weekly limit";

// =============================================================================
// Probe
// =============================================================================

/// Codex CLI probe.
pub struct CodexProbe {
    settings: ProbeSettings,
    runner: Arc<dyn TerminalRunner>,
    rpc: Arc<dyn RpcLauncher>,
}

impl CodexProbe {
    #[must_use]
    pub fn new(
        settings: ProbeSettings,
        runner: Arc<dyn TerminalRunner>,
        rpc: Arc<dyn RpcLauncher>,
    ) -> Self {
        Self {
            settings,
            runner,
            rpc,
        }
    }

    /// Launch the app server, read rate limits within `budget`, and always
    /// shut it down.
    async fn fetch_via_rpc(&self, program: &Path, budget: Duration) -> Result<RateLimits, RpcError> {
        let args: Vec<&str> = SANDBOX_ARGS.iter().copied().chain(["app-server"]).collect();
        let mut client = self.rpc.launch(program, &args, budget)?;

        let exchange = async {
            client.initialize().await?;
            client.fetch_rate_limits().await
        };
        let result = tokio::time::timeout(budget, exchange)
            .await
            .unwrap_or(Err(RpcError::Timeout(budget)));

        client.shutdown().await;
        result
    }

    fn pty_request(&self, timeout: Duration) -> PtyRequest {
        PtyRequest::new(&self.settings.binary)
            .args(SANDBOX_ARGS.iter().copied())
            .input("/status\n")
            .timeout(timeout)
            .triggers(TriggerTable::new().with("Press enter to continue", "\r"))
            .stop_on([WEEKLY_LABEL, "data not available yet", "Update available"])
    }

    async fn fetch_via_pty(&self, timeout: Duration) -> ProbeResult<UsageSnapshot> {
        let transcript = self.runner.run(self.pty_request(timeout)).await?;
        tracing::trace!(provider = PROVIDER_ID, output = %transcript.output, "transcript");
        parse_status(&transcript.clean())
    }
}

#[async_trait]
impl UsageProbe for CodexProbe {
    fn provider(&self) -> Provider {
        Provider::Codex
    }

    async fn is_available(&self) -> bool {
        self.runner.locate(&self.settings.binary).is_some()
    }

    async fn probe(&self) -> ProbeResult<UsageSnapshot> {
        let deadline = Deadline::after(self.settings.timeout);
        let program = self
            .runner
            .locate(&self.settings.binary)
            .ok_or_else(|| ProbeError::BinaryNotFound(self.settings.binary.clone()))?;

        match self.fetch_via_rpc(&program, deadline.half().min(RPC_TIMEOUT)).await {
            Ok(limits) => match snapshot_from_rate_limits(&limits) {
                Ok(snapshot) => {
                    tracing::debug!(provider = PROVIDER_ID, strategy = "rpc", "rate limits read");
                    return Ok(snapshot);
                }
                Err(e) => {
                    tracing::warn!(provider = PROVIDER_ID, strategy = "rpc", error = %e, "falling back to PTY");
                }
            },
            Err(e) => {
                tracing::warn!(provider = PROVIDER_ID, strategy = "rpc", error = %e, "falling back to PTY");
            }
        }

        self.fetch_via_pty(deadline.require()?).await
    }

    fn time_budget(&self) -> Option<Duration> {
        Some(self.settings.timeout)
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Snapshot from an RPC rate-limit read.
///
/// # Errors
///
/// [`ProbeError::ParseFailed`] when neither window is present.
pub fn snapshot_from_rate_limits(limits: &RateLimits) -> ProbeResult<UsageSnapshot> {
    let quotas = limits.to_quotas(PROVIDER_ID)?;
    Ok(UsageSnapshot::with_quotas(PROVIDER_ID, quotas).with_identity(
        None,
        None,
        limits.plan_type.clone(),
    ))
}

/// Parse the `/status` screen.
///
/// # Errors
///
/// Known failure markers, or [`ProbeError::ParseFailed`] when no limit line
/// is present.
pub fn parse_status(text: &str) -> ProbeResult<UsageSnapshot> {
    let lower = text.to_lowercase();
    if lower.contains("data not available yet") {
        return Err(ProbeError::ParseFailed("Data not available yet".to_string()));
    }
    if lower.contains("update available") && lower.contains("codex") {
        return Err(ProbeError::UpdateRequired("Codex CLI update required".to_string()));
    }
    if let Some(kind) = detect_known_error(text) {
        tracing::warn!(provider = PROVIDER_ID, error = ?kind, "known error in output");
        return Err(kind.into());
    }

    let quotas: Vec<UsageQuota> = [
        (QuotaType::Session, SESSION_LABEL),
        (QuotaType::Weekly, WEEKLY_LABEL),
    ]
    .into_iter()
    .filter_map(|(quota_type, label)| {
        let percent = extract_percent(label, text)?;
        let reset = extract_reset(label, text);
        Some(
            UsageQuota::new(quota_type, f64::from(percent), PROVIDER_ID)
                .with_resets_at(parse_relative_offset(reset.as_deref()))
                .with_reset_text(clean_reset_text(reset.as_deref())),
        )
    })
    .collect();

    if quotas.is_empty() {
        return Err(ProbeError::ParseFailed(
            "Could not find usage limits in Codex output".to_string(),
        ));
    }

    Ok(UsageSnapshot::with_quotas(PROVIDER_ID, quotas).with_identity(extract_email(text), None, None))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rpc::RateLimitWindow;
    use crate::test_utils::{RpcScript, ScriptedRpcLauncher, ScriptedTerminal};

    const STATUS: &str = "\
>_ OpenAI Codex (v0.46.0)

 Model:            gpt-5-codex (reasoning medium)
 Account:          dev@example.com (Plus)

 5h limit:         [████████████████░░░░] 72% left (resets 14:32)
 Weekly limit:     [██████░░░░░░░░░░░░░░] 30% left (resets 09:10 on 20 Oct)
";

    fn window(used: f64) -> RateLimitWindow {
        RateLimitWindow {
            used_percent: used,
            window_minutes: Some(300),
            resets_at: None,
            reset_description: Some("Resets in 1h 0m".to_string()),
        }
    }

    fn probe(terminal: ScriptedTerminal, rpc: ScriptedRpcLauncher) -> CodexProbe {
        CodexProbe::new(
            ProbeSettings::defaults(Provider::Codex),
            Arc::new(terminal),
            Arc::new(rpc),
        )
    }

    #[test]
    fn parses_status_screen() {
        let snapshot = parse_status(STATUS).expect("snapshot");
        assert_eq!(snapshot.quotas.len(), 2);
        let session = snapshot.session_quota().expect("session");
        assert!((session.percent_remaining - 72.0).abs() < f64::EPSILON);
        assert_eq!(session.reset_text.as_deref(), Some("resets 14:32"));
        let weekly = snapshot.weekly_quota().expect("weekly");
        assert!((weekly.percent_remaining - 30.0).abs() < f64::EPSILON);
        assert_eq!(snapshot.account_email.as_deref(), Some("dev@example.com"));
    }

    #[test]
    fn status_error_markers() {
        assert_eq!(
            parse_status("Rate limits: data not available yet"),
            Err(ProbeError::ParseFailed("Data not available yet".into()))
        );
        assert!(matches!(
            parse_status("✨ Update available! 0.46.0 -> 0.47.0\nRun npm i -g @openai/codex"),
            Err(ProbeError::UpdateRequired(_))
        ));
        assert!(matches!(
            parse_status(">_ OpenAI Codex\n nothing useful"),
            Err(ProbeError::ParseFailed(_))
        ));
    }

    #[test]
    fn rate_limits_snapshot_carries_plan() {
        let limits = RateLimits {
            primary: Some(window(25.0)),
            secondary: None,
            plan_type: Some("plus".into()),
        };
        let snapshot = snapshot_from_rate_limits(&limits).expect("snapshot");
        assert_eq!(snapshot.quotas.len(), 1);
        assert_eq!(snapshot.login_method.as_deref(), Some("plus"));
        assert_eq!(
            snapshot.quotas[0].reset_text.as_deref(),
            Some("Resets in 1h 0m")
        );
    }

    #[tokio::test]
    async fn rpc_success_skips_pty() {
        let rpc = ScriptedRpcLauncher::new().push(RpcScript::returning(RateLimits {
            primary: Some(window(10.0)),
            secondary: Some(window(50.0)),
            plan_type: None,
        }));
        let terminal = ScriptedTerminal::new();
        let shutdowns = rpc.shutdown_counter();
        let probe = probe(terminal.clone(), rpc);

        let snapshot = probe.probe().await.expect("snapshot");
        assert_eq!(snapshot.quotas.len(), 2);
        assert!(terminal.requests().is_empty());
        assert_eq!(shutdowns.get(), 1);
    }

    #[tokio::test]
    async fn rpc_failure_falls_back_to_pty() {
        let rpc = ScriptedRpcLauncher::new().push(RpcScript::failing_fetch(RpcError::Closed));
        let terminal = ScriptedTerminal::new().with_output(STATUS);
        let shutdowns = rpc.shutdown_counter();
        let probe = probe(terminal.clone(), rpc);

        let snapshot = probe.probe().await.expect("snapshot");
        assert_eq!(snapshot.quotas.len(), 2);
        assert_eq!(shutdowns.get(), 1);

        let requests = terminal.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].args, vec!["-s", "read-only", "-a", "untrusted"]);
        assert_eq!(requests[0].initial_input.as_deref(), Some("/status\n"));
    }

    #[tokio::test]
    async fn empty_rate_limits_fall_back_to_pty() {
        let rpc = ScriptedRpcLauncher::new().push(RpcScript::returning(RateLimits::default()));
        let terminal = ScriptedTerminal::new().with_output(STATUS);
        let snapshot = probe(terminal.clone(), rpc).probe().await.expect("snapshot");
        assert_eq!(snapshot.quotas.len(), 2);
        assert_eq!(terminal.requests().len(), 1);
    }

    #[tokio::test]
    async fn launch_failure_falls_back_to_pty() {
        let rpc = ScriptedRpcLauncher::new().push(RpcScript::failing_launch(RpcError::Spawn(
            "permission denied".into(),
        )));
        let terminal = ScriptedTerminal::new().with_output(STATUS);
        assert!(probe(terminal, rpc).probe().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn hung_rpc_leaves_budget_for_pty() {
        let rpc = ScriptedRpcLauncher::new().push(RpcScript::hanging());
        let shutdowns = rpc.shutdown_counter();
        let terminal = ScriptedTerminal::new().with_output(STATUS);
        let probe = CodexProbe::new(
            ProbeSettings::defaults(Provider::Codex).with_timeout(Duration::from_secs(10)),
            Arc::new(terminal.clone()),
            Arc::new(rpc),
        );
        assert_eq!(probe.time_budget(), Some(Duration::from_secs(10)));

        let started = tokio::time::Instant::now();
        let snapshot = probe.probe().await.expect("snapshot");

        assert_eq!(snapshot.quotas.len(), 2);
        assert_eq!(shutdowns.get(), 1);
        assert_eq!(started.elapsed(), Duration::from_secs(5));
        let requests = terminal.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].timeout, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn rpc_tier_is_capped() {
        let rpc = ScriptedRpcLauncher::new().push(RpcScript::hanging());
        let terminal = ScriptedTerminal::new().with_output(STATUS);
        let probe = CodexProbe::new(
            ProbeSettings::defaults(Provider::Codex).with_timeout(Duration::from_secs(60)),
            Arc::new(terminal.clone()),
            Arc::new(rpc),
        );

        let started = tokio::time::Instant::now();
        probe.probe().await.expect("snapshot");
        assert_eq!(started.elapsed(), RPC_TIMEOUT);
        assert_eq!(terminal.requests()[0].timeout, Duration::from_secs(60) - RPC_TIMEOUT);
    }

    #[tokio::test]
    async fn missing_binary_fails_fast() {
        let rpc = ScriptedRpcLauncher::new();
        let terminal = ScriptedTerminal::missing();
        let probe = probe(terminal, rpc);
        assert!(!probe.is_available().await);
        assert_eq!(
            probe.probe().await,
            Err(ProbeError::BinaryNotFound("codex".into()))
        );
    }
}
