//! z.ai provider implementation.
//!
//! HTTP only: one authenticated GET against the quota-limit monitor endpoint.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::core::credentials::TokenSource;
use crate::core::http::{build_client, get_json};
use crate::core::models::{QuotaType, UsageQuota, UsageSnapshot};
use crate::core::provider::{ProbeSettings, Provider, UsageProbe};
use crate::error::{ProbeError, ProbeResult};

/// Provider id.
pub const PROVIDER_ID: &str = "zai";

/// Quota-limit endpoint used unless the config overrides it.
pub const DEFAULT_ENDPOINT: &str = "https://api.z.ai/api/monitor/usage/quota/limit";

const TOKENS_LIMIT: &str = "TOKENS_LIMIT";
const TIME_LIMIT: &str = "TIME_LIMIT";
const TIME_LIMIT_NAME: &str = "MCP";

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaLimitResponse {
    pub data: Option<QuotaLimitData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaLimitData {
    #[serde(default)]
    pub limits: Vec<QuotaLimit>,
}

/// One limit; `percentage` is the share already used.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaLimit {
    #[serde(rename = "type")]
    pub kind: String,
    pub percentage: Option<f64>,
    /// Epoch milliseconds.
    pub next_reset_time: Option<i64>,
}

// =============================================================================
// Probe
// =============================================================================

/// z.ai probe.
pub struct ZaiProbe {
    settings: ProbeSettings,
    tokens: Arc<dyn TokenSource>,
}

impl ZaiProbe {
    #[must_use]
    pub fn new(settings: ProbeSettings, tokens: Arc<dyn TokenSource>) -> Self {
        Self { settings, tokens }
    }

    fn endpoint(&self) -> &str {
        self.settings.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT)
    }
}

#[async_trait]
impl UsageProbe for ZaiProbe {
    fn provider(&self) -> Provider {
        Provider::Zai
    }

    async fn is_available(&self) -> bool {
        self.tokens.token(PROVIDER_ID).is_some()
    }

    async fn probe(&self) -> ProbeResult<UsageSnapshot> {
        let token = self
            .tokens
            .token(PROVIDER_ID)
            .ok_or(ProbeError::AuthenticationRequired)?;
        let client = build_client(self.settings.timeout)?;

        tracing::debug!(provider = PROVIDER_ID, url = self.endpoint(), "fetching quota limits");
        let response: QuotaLimitResponse = get_json(&client, self.endpoint(), &token).await?;
        parse_quota_limits(&response)
    }

    fn time_budget(&self) -> Option<Duration> {
        Some(self.settings.timeout)
    }
}

// =============================================================================
// Parsing
// =============================================================================

/// Snapshot from a quota-limit response. Unknown limit types are skipped.
///
/// # Errors
///
/// [`ProbeError::ParseFailed`] when `data.limits` is missing or yields
/// nothing usable.
pub fn parse_quota_limits(response: &QuotaLimitResponse) -> ProbeResult<UsageSnapshot> {
    let limits = response
        .data
        .as_ref()
        .map(|d| d.limits.as_slice())
        .unwrap_or_default();

    let quotas: Vec<UsageQuota> = limits
        .iter()
        .filter_map(|limit| {
            let quota_type = match limit.kind.as_str() {
                TOKENS_LIMIT => QuotaType::Session,
                TIME_LIMIT => QuotaType::TimeLimit(TIME_LIMIT_NAME.to_string()),
                other => {
                    tracing::debug!(provider = PROVIDER_ID, kind = other, "skipping limit type");
                    return None;
                }
            };
            let used = limit.percentage?;
            Some(
                UsageQuota::from_used(quota_type, used, PROVIDER_ID)
                    .with_resets_at(limit.next_reset_time.and_then(DateTime::<Utc>::from_timestamp_millis)),
            )
        })
        .collect();

    if quotas.is_empty() {
        return Err(ProbeError::ParseFailed("No quota limits in response".to_string()));
    }
    Ok(UsageSnapshot::with_quotas(PROVIDER_ID, quotas))
}
