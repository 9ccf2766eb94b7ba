//! Usage command implementation.

use std::fmt::Write as _;

use serde::Serialize;

use crate::core::pipeline::{ProbeOutcome, batch_exit_code, probe_all};
use crate::core::provider::{Provider, ProviderRegistry};
use crate::core::models::UsageSnapshot;
use crate::error::{ExitCode, ProbeError, Result};
use crate::storage::config::ResolvedConfig;

/// One provider's result in JSON output.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport<'a> {
    pub provider: Provider,
    pub ok: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<&'a UsageSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorReport>,
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub code: &'static str,
    pub category: String,
    pub message: String,
}

impl<'a> From<&'a ProbeOutcome> for ProbeReport<'a> {
    fn from(outcome: &'a ProbeOutcome) -> Self {
        Self {
            provider: outcome.provider,
            ok: outcome.is_success(),
            duration_ms: outcome.duration_ms,
            snapshot: outcome.snapshot(),
            error: outcome.error().map(|e| ErrorReport {
                code: e.error_code(),
                category: e.category().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Probe the configured providers and print the results.
///
/// # Errors
///
/// Only when JSON serialization fails; probe failures are reported in the
/// output and the returned exit code.
pub async fn execute(
    config: &ResolvedConfig,
    registry: &ProviderRegistry,
    json: bool,
    pretty: bool,
) -> Result<ExitCode> {
    tracing::debug!(providers = ?config.providers, "starting usage probe");

    let outcomes = probe_all(registry, &config.providers, config.timeout).await;

    let rendered = if json {
        render_json(&outcomes, pretty)?
    } else {
        render_text(&outcomes)
    };
    print!("{rendered}");

    Ok(batch_exit_code(&outcomes))
}

/// JSON array of [`ProbeReport`]s.
///
/// # Errors
///
/// Serialization failure.
pub fn render_json(outcomes: &[ProbeOutcome], pretty: bool) -> Result<String> {
    let reports: Vec<ProbeReport<'_>> = outcomes.iter().map(ProbeReport::from).collect();
    let mut out = if pretty {
        serde_json::to_string_pretty(&reports)?
    } else {
        serde_json::to_string(&reports)?
    };
    out.push('\n');
    Ok(out)
}

/// One line per quota, cost figure, or failure.
#[must_use]
pub fn render_text(outcomes: &[ProbeOutcome]) -> String {
    let mut out = String::new();
    for outcome in outcomes {
        let name = outcome.provider.display_name();
        match &outcome.result {
            Ok(snapshot) => {
                for quota in &snapshot.quotas {
                    let _ = write!(
                        out,
                        "{name:<8} {:<16} {:>5.1}% left",
                        quota.quota_type.display_name(),
                        quota.percent_remaining
                    );
                    if let Some(reset) = &quota.reset_text {
                        let _ = write!(out, "  {reset}");
                    }
                    out.push('\n');
                }
                if let Some(cost) = &snapshot.cost_usage {
                    let _ = write!(out, "{name:<8} {:<16} {}", "Cost", cost.formatted_cost());
                    if let Some(budget) = cost.budget {
                        let _ = write!(out, " of ${budget:.2}");
                    }
                    out.push('\n');
                }
                if snapshot.is_empty() {
                    let _ = writeln!(out, "{name:<8} no usage data");
                }
            }
            Err(e) => {
                let _ = write!(out, "{name:<8} error [{}] {e}", e.error_code());
                if let Some(hint) = e.as_probe().and_then(ProbeError::hint) {
                    let _ = write!(out, " ({hint})");
                }
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::CostUsage;
    use crate::error::QuotaProbeError;
    use crate::test_utils::make_test_snapshot;
    use chrono::Utc;
    use rust_decimal::Decimal;

    fn outcome(provider: Provider, result: std::result::Result<UsageSnapshot, QuotaProbeError>) -> ProbeOutcome {
        ProbeOutcome {
            provider,
            result,
            started_at: Utc::now(),
            duration_ms: 12,
        }
    }

    #[test]
    fn text_lists_quotas_cost_and_failures() {
        let outcomes = vec![
            outcome(Provider::Codex, Ok(make_test_snapshot("codex", 72.0))),
            outcome(
                Provider::Claude,
                Ok(UsageSnapshot::with_cost("claude", CostUsage::new(Decimal::new(55, 2)))),
            ),
            outcome(
                Provider::Zai,
                Err(QuotaProbeError::Probe(ProbeError::AuthenticationRequired)),
            ),
        ];
        let text = render_text(&outcomes);
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("Codex"));
        assert!(lines[0].contains("72.0% left"));
        assert!(lines[0].contains("Resets in 2h"));
        assert!(lines[1].contains("$0.55"));
        assert!(lines[2].contains("error [QP-A001]"));
        assert!(lines[2].ends_with("(log in again with the provider's CLI)"));
    }

    #[test]
    fn json_reports_snapshot_or_error() {
        let outcomes = vec![
            outcome(Provider::Codex, Ok(make_test_snapshot("codex", 50.0))),
            outcome(
                Provider::Gemini,
                Err(QuotaProbeError::TimeoutWithProvider {
                    provider: "gemini".into(),
                    seconds: 20,
                }),
            ),
        ];
        let json = render_json(&outcomes, false).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value[0]["provider"], "codex");
        assert_eq!(value[0]["ok"], true);
        assert!(value[0]["snapshot"]["quotas"].is_array());
        assert!(value[0].get("error").is_none());

        assert_eq!(value[1]["ok"], false);
        assert_eq!(value[1]["error"]["code"], "QP-E010");
        assert!(value[1].get("snapshot").is_none());
    }
}
