//! Concurrent probe execution.
//!
//! Runs the selected probes side by side. Each probe is bounded by its own
//! time budget plus [`TEARDOWN_GRACE`]; when the bound expires the probe
//! future is dropped, which tears down whatever subprocess it owned.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tokio::time::{Duration, timeout};

use super::models::UsageSnapshot;
use super::provider::{Provider, ProviderRegistry, UsageProbe};
use crate::error::{ExitCode, QuotaProbeError};

/// Headroom past a probe's own budget for killing and reaping its children.
pub const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

/// Result of probing one provider.
#[derive(Debug)]
pub struct ProbeOutcome {
    pub provider: Provider,
    pub result: Result<UsageSnapshot, QuotaProbeError>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ProbeOutcome {
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    #[must_use]
    pub fn snapshot(&self) -> Option<&UsageSnapshot> {
        self.result.as_ref().ok()
    }

    #[must_use]
    pub fn error(&self) -> Option<&QuotaProbeError> {
        self.result.as_ref().err()
    }
}

/// Probe one provider. A probe that declares a [`UsageProbe::time_budget`]
/// is bounded by that budget plus [`TEARDOWN_GRACE`]; any other probe by
/// `default_limit`.
pub async fn probe_one(probe: Arc<dyn UsageProbe>, default_limit: Duration) -> ProbeOutcome {
    let provider = probe.provider();
    let started_at = Utc::now();
    let start = Instant::now();

    let (budget, limit) = probe
        .time_budget()
        .map_or((default_limit, default_limit), |budget| (budget, budget + TEARDOWN_GRACE));

    tracing::info!(provider = %provider, timeout_secs = budget.as_secs(), "probing provider");

    let result = match timeout(limit, probe.probe()).await {
        Ok(Ok(snapshot)) => Ok(snapshot),
        Ok(Err(e)) => Err(QuotaProbeError::Probe(e)),
        Err(_) => Err(QuotaProbeError::TimeoutWithProvider {
            provider: provider.id().to_string(),
            seconds: budget.as_secs(),
        }),
    };
    let duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

    match &result {
        Ok(snapshot) => {
            tracing::info!(
                provider = %provider,
                duration_ms,
                quotas = snapshot.quotas.len(),
                has_cost = snapshot.cost_usage.is_some(),
                "probe succeeded"
            );
            for quota in &snapshot.quotas {
                tracing::info!(
                    provider = %provider,
                    quota = %quota.quota_type,
                    remaining = quota.percent_remaining,
                    "quota"
                );
            }
        }
        Err(e) => {
            tracing::warn!(
                provider = %provider,
                duration_ms,
                error = %e,
                error_code = e.error_code(),
                "probe failed"
            );
        }
    }

    ProbeOutcome {
        provider,
        result,
        started_at,
        duration_ms,
    }
}

/// Probe `providers` concurrently. Providers missing from the registry yield
/// a [`QuotaProbeError::ProviderDisabled`] outcome. Results keep the order of
/// `providers`. `default_limit` bounds probes without a budget of their own.
pub async fn probe_all(
    registry: &ProviderRegistry,
    providers: &[Provider],
    default_limit: Duration,
) -> Vec<ProbeOutcome> {
    let futures = providers.iter().map(|&provider| {
        let probe = registry.get(provider);
        async move {
            match probe {
                Some(probe) => probe_one(probe, default_limit).await,
                None => ProbeOutcome {
                    provider,
                    result: Err(QuotaProbeError::ProviderDisabled(provider.id().to_string())),
                    started_at: Utc::now(),
                    duration_ms: 0,
                },
            }
        }
    });

    futures::future::join_all(futures).await
}

/// Availability of every registered provider, checked concurrently.
pub async fn availability(registry: &ProviderRegistry) -> Vec<(Provider, bool)> {
    let futures = registry.iter().map(|probe| async move {
        (probe.provider(), probe.is_available().await)
    });
    futures::future::join_all(futures).await
}

/// Exit code for a batch: success if anything succeeded (or nothing ran),
/// otherwise the first failure's code.
#[must_use]
pub fn batch_exit_code(outcomes: &[ProbeOutcome]) -> ExitCode {
    if outcomes.is_empty() || outcomes.iter().any(ProbeOutcome::is_success) {
        return ExitCode::Success;
    }
    outcomes
        .iter()
        .find_map(ProbeOutcome::error)
        .map_or(ExitCode::GeneralError, QuotaProbeError::exit_code)
}
