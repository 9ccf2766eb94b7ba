//! Gemini (Google) provider implementation.
//!
//! Primary path is the Code Assist quota API, authenticated with the token
//! the Gemini CLI stores in `~/.gemini/oauth_creds.json`. When the API fails
//! for a reason other than authentication, the `/stats` screen of the CLI is
//! parsed instead. With the CLI installed, the API gets half of the probe's
//! budget so the fallback always has time to run.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::core::classify::detect_known_error;
use crate::core::credentials::{GeminiOAuthFile, TokenSource};
use crate::core::extract::{clean_reset_text, extract_email, parse_relative_offset};
use crate::core::http::{build_client, post_json};
use crate::core::models::{QuotaType, UsageQuota, UsageSnapshot};
use crate::core::provider::{Deadline, ProbeSettings, Provider, UsageProbe};
use crate::core::pty::{PtyRequest, TerminalRunner, TriggerTable};
use crate::error::{ProbeError, ProbeResult};

/// Provider id.
pub const PROVIDER_ID: &str = "gemini";

/// Quota endpoint used unless the config overrides it.
pub const DEFAULT_QUOTA_ENDPOINT: &str =
    "https://cloudcode-pa.googleapis.com/v1internal:retrieveUserQuota";

const QUOTA_METHOD: &str = ":retrieveUserQuota";
const LOAD_CODE_ASSIST_METHOD: &str = ":loadCodeAssist";

/// Environment variable naming the Cloud project to bill quota against.
pub const PROJECT_ENV: &str = "GOOGLE_CLOUD_PROJECT";

static STATS_ROW_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"│\s*([A-Za-z0-9][A-Za-z0-9._\-]*)\s*│\s*(\d+(?:\.\d+)?)%\s*(?:\(([^)]*)\))?")
        .expect("stats row regex")
});

// =============================================================================
// Wire Types
// =============================================================================

/// `retrieveUserQuota` response body.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaResponse {
    #[serde(default)]
    pub buckets: Vec<QuotaBucket>,
}

/// One quota bucket. A model usually has one per token type.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaBucket {
    pub model_id: Option<String>,
    pub remaining_fraction: Option<f64>,
    pub reset_time: Option<String>,
    pub token_type: Option<String>,
}

// =============================================================================
// Probe
// =============================================================================

/// Gemini probe.
pub struct GeminiProbe {
    settings: ProbeSettings,
    runner: Arc<dyn TerminalRunner>,
    tokens: Arc<dyn TokenSource>,
    credentials_path: Option<PathBuf>,
    project: Option<String>,
}

impl GeminiProbe {
    #[must_use]
    pub fn new(
        settings: ProbeSettings,
        runner: Arc<dyn TerminalRunner>,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            settings,
            runner,
            tokens,
            credentials_path: GeminiOAuthFile::default_path(),
            project: std::env::var(PROJECT_ENV).ok().filter(|p| !p.trim().is_empty()),
        }
    }

    /// Read OAuth credentials from `path` instead of the home directory.
    #[must_use]
    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.credentials_path = Some(path.into());
        self
    }

    /// Use `project` instead of discovering one.
    #[must_use]
    pub fn with_project(mut self, project: Option<String>) -> Self {
        self.project = project;
        self
    }

    fn endpoint(&self) -> &str {
        self.settings
            .endpoint
            .as_deref()
            .unwrap_or(DEFAULT_QUOTA_ENDPOINT)
    }

    /// Access token from the token source, then the CLI's OAuth file.
    fn access_token(&self) -> ProbeResult<String> {
        if let Some(token) = self.tokens.token(PROVIDER_ID) {
            tracing::debug!(provider = PROVIDER_ID, "using token from token source");
            return Ok(token);
        }

        let path = self
            .credentials_path
            .as_deref()
            .ok_or(ProbeError::AuthenticationRequired)?;
        let creds = GeminiOAuthFile::load(path)?;
        if creds.is_expired() {
            tracing::warn!(
                provider = PROVIDER_ID,
                path = %path.display(),
                "OAuth token expired; run gemini once to refresh it"
            );
        }
        creds.require_token().map(str::to_string)
    }

    async fn fetch_via_api(&self, budget: Duration) -> ProbeResult<UsageSnapshot> {
        let token = self.access_token()?;
        let client = build_client(budget)?;

        let project = match &self.project {
            Some(project) => Some(project.clone()),
            None => discover_project(&client, self.endpoint(), &token).await,
        };
        let body = project.map_or_else(|| json!({}), |id| json!({ "project": id }));

        let response: QuotaResponse = post_json(&client, self.endpoint(), &token, &body).await?;
        let quotas = parse_quota_response(&response)?;
        Ok(UsageSnapshot::with_quotas(PROVIDER_ID, quotas))
    }

    async fn fetch_via_pty(&self, timeout: Duration) -> ProbeResult<UsageSnapshot> {
        let request = PtyRequest::new(&self.settings.binary)
            .input("/stats\n")
            .timeout(timeout)
            .triggers(TriggerTable::new())
            .stop_on(["resets in", "Login with Google"]);
        let transcript = self.runner.run(request).await?;
        tracing::trace!(provider = PROVIDER_ID, output = %transcript.output, "transcript");
        parse_stats_text(&transcript.clean())
    }
}

#[async_trait]
impl UsageProbe for GeminiProbe {
    fn provider(&self) -> Provider {
        Provider::Gemini
    }

    async fn is_available(&self) -> bool {
        self.tokens.token(PROVIDER_ID).is_some()
            || self.credentials_path.as_deref().is_some_and(std::path::Path::exists)
            || self.runner.locate(&self.settings.binary).is_some()
    }

    async fn probe(&self) -> ProbeResult<UsageSnapshot> {
        let deadline = Deadline::after(self.settings.timeout);
        let can_fall_back = self.runner.locate(&self.settings.binary).is_some();
        let api_budget = if can_fall_back {
            deadline.half()
        } else {
            deadline.remaining()
        };

        // Discovery and the quota call share the API budget.
        let api = tokio::time::timeout(api_budget, self.fetch_via_api(api_budget))
            .await
            .unwrap_or(Err(ProbeError::Timeout));

        match api {
            Ok(snapshot) => Ok(snapshot),
            Err(ProbeError::AuthenticationRequired) => Err(ProbeError::AuthenticationRequired),
            Err(api_error) => {
                if !can_fall_back {
                    return Err(api_error);
                }
                tracing::warn!(provider = PROVIDER_ID, error = %api_error, "quota API failed, falling back to PTY");
                self.fetch_via_pty(deadline.require()?).await
            }
        }
    }

    fn time_budget(&self) -> Option<Duration> {
        Some(self.settings.timeout)
    }
}

/// Best-effort lookup of the Code Assist project bound to the account.
async fn discover_project(client: &reqwest::Client, endpoint: &str, token: &str) -> Option<String> {
    let url = sibling_method(endpoint, LOAD_CODE_ASSIST_METHOD)?;
    let body = json!({
        "metadata": {
            "ideType": "IDE_UNSPECIFIED",
            "platform": "PLATFORM_UNSPECIFIED",
            "pluginType": "GEMINI",
        }
    });
    match post_json::<_, Value>(client, &url, token, &body).await {
        Ok(value) => project_from_load_response(&value),
        Err(e) => {
            tracing::debug!(provider = PROVIDER_ID, error = %e, "project discovery failed");
            None
        }
    }
}

/// Same API base as `endpoint`, calling `method` instead.
fn sibling_method(endpoint: &str, method: &str) -> Option<String> {
    endpoint
        .strip_suffix(QUOTA_METHOD)
        .map(|base| format!("{base}{method}"))
}

/// `cloudaicompanionProject` is either a bare id or an object with an `id`.
fn project_from_load_response(value: &Value) -> Option<String> {
    let project = value.get("cloudaicompanionProject")?;
    project
        .as_str()
        .or_else(|| project.get("id").and_then(Value::as_str))
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

// =============================================================================
// Parsing
// =============================================================================

/// Quotas from a `retrieveUserQuota` response, one per model.
///
/// The lowest remaining fraction among a model's buckets wins. Output is
/// sorted by model id.
///
/// # Errors
///
/// [`ProbeError::ParseFailed`] when no usable bucket is present.
pub fn parse_quota_response(response: &QuotaResponse) -> ProbeResult<Vec<UsageQuota>> {
    let mut worst: BTreeMap<&str, (f64, Option<&str>)> = BTreeMap::new();
    for bucket in &response.buckets {
        let (Some(model), Some(fraction)) = (bucket.model_id.as_deref(), bucket.remaining_fraction)
        else {
            continue;
        };
        let entry = worst
            .entry(model)
            .or_insert((fraction, bucket.reset_time.as_deref()));
        if fraction < entry.0 {
            *entry = (fraction, bucket.reset_time.as_deref());
        }
    }

    if worst.is_empty() {
        return Err(ProbeError::ParseFailed("No quota buckets in response".to_string()));
    }

    Ok(worst
        .into_iter()
        .map(|(model, (fraction, reset))| {
            UsageQuota::new(
                QuotaType::ModelSpecific(model.to_string()),
                fraction * 100.0,
                PROVIDER_ID,
            )
            .with_resets_at(reset.and_then(parse_reset_time))
            .with_reset_text(reset.map(|r| format!("Resets {r}")))
        })
        .collect())
}

fn parse_reset_time(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parse the `/stats` model table.
///
/// # Errors
///
/// Known failure markers, or [`ProbeError::ParseFailed`] when no model row
/// is present.
pub fn parse_stats_text(text: &str) -> ProbeResult<UsageSnapshot> {
    if let Some(kind) = detect_known_error(text) {
        tracing::warn!(provider = PROVIDER_ID, error = ?kind, "known error in output");
        return Err(kind.into());
    }

    let mut worst: BTreeMap<String, (f64, Option<String>)> = BTreeMap::new();
    for caps in STATS_ROW_RE.captures_iter(text) {
        let (Some(model), Some(percent)) = (caps.get(1), caps.get(2)) else {
            continue;
        };
        let Ok(percent) = percent.as_str().parse::<f64>() else {
            continue;
        };
        let reset = caps.get(3).map(|m| m.as_str().trim().to_string());
        let entry = worst
            .entry(model.as_str().to_string())
            .or_insert_with(|| (percent, reset.clone()));
        if percent < entry.0 {
            *entry = (percent, reset);
        }
    }

    if worst.is_empty() {
        return Err(ProbeError::ParseFailed(
            "Could not find model usage in Gemini output".to_string(),
        ));
    }

    let quotas = worst
        .into_iter()
        .map(|(model, (percent, reset))| {
            UsageQuota::new(QuotaType::ModelSpecific(model), percent, PROVIDER_ID)
                .with_resets_at(parse_relative_offset(reset.as_deref()))
                .with_reset_text(clean_reset_text(reset.as_deref()))
        })
        .collect();

    Ok(UsageSnapshot::with_quotas(PROVIDER_ID, quotas).with_identity(extract_email(text), None, None))
}
