//! Claude (Anthropic) provider implementation.
//!
//! Drives the interactive CLI through a PTY:
//! 1. `/status` to learn the account tier and identity
//! 2. `/usage` for subscription tiers, or `/cost` for API accounts
//!
//! Subscription output may also carry an "Extra usage" overage line, which is
//! kept as cost usage with a budget.

use std::str::FromStr;
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use rust_decimal::Decimal;

use crate::core::classify::{ErrorKind, classify_account_type, detect_known_error};
use crate::core::extract::{
    clean_reset_text, extract_currency, extract_email, extract_labeled_text, extract_line_delta,
    extract_login_method, extract_organization, extract_percent, extract_percent_any,
    extract_reset, parse_duration_string, parse_relative_offset,
};
use crate::core::models::{AccountType, CostUsage, QuotaType, UsageQuota, UsageSnapshot};
use crate::core::provider::{Deadline, ProbeSettings, Provider, UsageProbe};
use crate::core::pty::{PtyRequest, TerminalRunner, Transcript, TriggerTable};
use crate::error::{ProbeError, ProbeResult};

/// Provider id.
pub const PROVIDER_ID: &str = "claude";

const TRUST_PROMPT: &str = "Do you trust the files in this folder?";

const SESSION_LABEL: &str = "Current session";
const WEEKLY_LABEL: &str = "Current week (all models)";
const WEEKLY_RESET_LABEL: &str = "Current week";
const MODEL_LABELS: &[&str] = &[
    "Current week (Opus)",
    "Current week (Sonnet only)",
    "Current week (Sonnet)",
];
const MODEL_QUOTA_NAME: &str = "opus";
const EXTRA_USAGE_LABEL: &str = "Extra usage";

/// Printed by every command when the session is unusable; ends the run early.
const ERROR_STOP_MARKERS: &[&str] = &["Please run /login", "authentication_error", "token_expired"];

static SPEND_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\$\s*([\d,]+(?:\.\d+)?)\s*/\s*\$\s*([\d,]+(?:\.\d+)?)\s*spent")
        .expect("spend regex")
});

/// Prompts the CLI may show before it runs a command.
#[must_use]
pub fn trigger_table() -> TriggerTable {
    TriggerTable::from_pairs(&[
        (TRUST_PROMPT, "y\r"),
        ("Ready to code here?", "\r"),
        ("Press Enter to continue", "\r"),
    ])
}

/// Slash commands this probe runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Status,
    Usage,
    Cost,
}

impl Command {
    const fn arg(self) -> &'static str {
        match self {
            Self::Status => "/status",
            Self::Usage => "/usage",
            Self::Cost => "/cost",
        }
    }

    /// Output that means the interesting part has been printed.
    const fn stop_markers(self) -> &'static [&'static str] {
        match self {
            Self::Status => &["Login method"],
            Self::Usage => &["% used", "% left", "no usage quotas"],
            Self::Cost => &["Total cost"],
        }
    }
}

// =============================================================================
// Probe
// =============================================================================

/// Claude CLI probe.
pub struct ClaudeProbe {
    settings: ProbeSettings,
    runner: Arc<dyn TerminalRunner>,
}

impl ClaudeProbe {
    #[must_use]
    pub fn new(settings: ProbeSettings, runner: Arc<dyn TerminalRunner>) -> Self {
        Self { settings, runner }
    }

    fn request(&self, command: Command, timeout: Duration) -> PtyRequest {
        PtyRequest::new(&self.settings.binary)
            .args([command.arg(), "--allowed-tools", ""])
            .timeout(timeout)
            .triggers(trigger_table())
            .stop_on(command.stop_markers().iter().chain(ERROR_STOP_MARKERS).copied())
    }

    async fn run(&self, command: Command, timeout: Duration) -> ProbeResult<String> {
        let transcript = self.runner.run(self.request(command, timeout)).await.map_err(|e| {
            tracing::warn!(provider = PROVIDER_ID, command = command.arg(), error = %e, "run failed");
            ProbeError::from(e)
        })?;
        tracing::trace!(provider = PROVIDER_ID, command = command.arg(), output = %transcript.output, "transcript");
        Ok(normalized(&transcript))
    }
}

#[async_trait]
impl UsageProbe for ClaudeProbe {
    fn provider(&self) -> Provider {
        Provider::Claude
    }

    async fn is_available(&self) -> bool {
        self.runner.locate(&self.settings.binary).is_some()
    }

    /// `/status` gets half of the budget; the follow-up command gets the
    /// rest.
    async fn probe(&self) -> ProbeResult<UsageSnapshot> {
        let deadline = Deadline::after(self.settings.timeout);
        let status = self.run(Command::Status, deadline.half()).await?;
        check_known_error(&status)?;

        let account_type = classify_account_type(&status);
        tracing::info!(provider = PROVIDER_ID, account_type = ?account_type, "account classified");

        if account_type.is_quota_bearing() {
            let usage = self.run(Command::Usage, deadline.require()?).await?;
            parse_usage(&usage, &status, account_type)
        } else {
            let cost = self.run(Command::Cost, deadline.require()?).await?;
            parse_cost(&cost, &status)
        }
    }

    fn time_budget(&self) -> Option<Duration> {
        Some(self.settings.timeout)
    }
}

/// Clean transcript text. A trust prompt the trigger table already answered
/// is removed so it cannot be mistaken for a blocking one.
fn normalized(transcript: &Transcript) -> String {
    let clean = transcript.clean();
    if transcript.answered.iter().any(|a| a == TRUST_PROMPT) {
        clean.replace(TRUST_PROMPT, "")
    } else {
        clean
    }
}

fn check_known_error(text: &str) -> ProbeResult<()> {
    match detect_known_error(text) {
        // An empty usage screen is a parse failure below, not an early error.
        None | Some(ErrorKind::DataNotReady) => Ok(()),
        Some(kind) => {
            tracing::warn!(provider = PROVIDER_ID, error = ?kind, "known error in output");
            Err(kind.into())
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Parse `/usage` output, taking identity from the `/status` output.
///
/// # Errors
///
/// A known error signature in the output, or [`ProbeError::ParseFailed`]
/// when the session percentage is missing.
pub fn parse_usage(
    usage: &str,
    status: &str,
    account_type: AccountType,
) -> ProbeResult<UsageSnapshot> {
    check_known_error(usage)?;

    let session = extract_percent(SESSION_LABEL, usage)
        .ok_or_else(|| ProbeError::ParseFailed("Could not find session usage".to_string()))?;
    let weekly = extract_percent(WEEKLY_LABEL, usage);
    let model = extract_percent_any(MODEL_LABELS, usage);

    let session_reset = extract_reset(SESSION_LABEL, usage);
    let weekly_reset = extract_reset(WEEKLY_RESET_LABEL, usage);

    let quota = |quota_type: QuotaType, percent: u32, reset: Option<&str>| {
        UsageQuota::new(quota_type, f64::from(percent), PROVIDER_ID)
            .with_resets_at(parse_relative_offset(reset))
            .with_reset_text(clean_reset_text(reset))
    };

    let mut quotas = vec![quota(QuotaType::Session, session, session_reset.as_deref())];
    if let Some(weekly) = weekly {
        quotas.push(quota(QuotaType::Weekly, weekly, weekly_reset.as_deref()));
    }
    if let Some(model) = model {
        quotas.push(quota(
            QuotaType::ModelSpecific(MODEL_QUOTA_NAME.to_string()),
            model,
            weekly_reset.as_deref(),
        ));
    }

    Ok(UsageSnapshot::with_quotas(PROVIDER_ID, quotas)
        .with_account_type(account_type)
        .with_cost_usage(extract_extra_usage(usage))
        .with_identity(
            extract_email(status),
            extract_organization(status),
            extract_login_method(status),
        ))
}

/// Parse `/cost` output for API accounts.
///
/// # Errors
///
/// A known error signature in the output, or [`ProbeError::ParseFailed`]
/// when the total cost is missing.
pub fn parse_cost(cost: &str, status: &str) -> ProbeResult<UsageSnapshot> {
    check_known_error(cost)?;

    let total = extract_currency("Total cost", cost).ok_or_else(|| {
        ProbeError::ParseFailed("Could not find total cost in /cost output".to_string())
    })?;
    let (lines_added, lines_removed) = extract_line_delta(cost);

    let usage = CostUsage {
        api_duration: extract_labeled_text("Total duration (API)", cost)
            .map_or(0.0, |d| parse_duration_string(&d)),
        wall_duration: extract_labeled_text("Total duration (wall)", cost)
            .map_or(0.0, |d| parse_duration_string(&d)),
        lines_added,
        lines_removed,
        ..CostUsage::new(total)
    };

    Ok(UsageSnapshot::with_cost(PROVIDER_ID, usage).with_identity(
        extract_email(status),
        extract_organization(status),
        extract_login_method(status),
    ))
}

/// "$3.20 / $50.00 spent" near an "Extra usage" heading.
fn extract_extra_usage(text: &str) -> Option<CostUsage> {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.to_lowercase().contains(&EXTRA_USAGE_LABEL.to_lowercase()))?;
    let caps = lines[start..]
        .iter()
        .take(crate::core::extract::PERCENT_WINDOW)
        .find_map(|line| SPEND_RE.captures(line))?;
    let amount = |idx: usize| Decimal::from_str(&caps.get(idx)?.as_str().replace(',', "")).ok();
    Some(CostUsage::new(amount(1)?).with_budget(amount(2)))
}
