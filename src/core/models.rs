//! Normalized usage data model.
//!
//! Every provider probe, whatever its transport, ends in these types. They are
//! provider-agnostic and serialize with camelCase field names.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Snapshots older than this are considered stale.
pub const STALE_AFTER_SECS: i64 = 5 * 60;

// =============================================================================
// Account Type
// =============================================================================

/// Account class that decides which half of a snapshot is authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AccountType {
    /// Entry subscription tier with session/weekly quotas.
    Pro,
    /// Higher subscription tier with session/weekly quotas.
    #[default]
    Max,
    /// Pay-per-use; tracked by cost rather than quota.
    Api,
}

impl AccountType {
    /// True for the subscription tiers.
    #[must_use]
    pub const fn is_quota_bearing(self) -> bool {
        matches!(self, Self::Pro | Self::Max)
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pro => "Pro",
            Self::Max => "Max",
            Self::Api => "API",
        }
    }
}

// =============================================================================
// Quota Type
// =============================================================================

/// Renewal period of a quota dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuotaDuration {
    Hours(u32),
    Days(u32),
}

impl QuotaDuration {
    /// Length of the period in hours.
    #[must_use]
    pub const fn hours(self) -> u32 {
        match self {
            Self::Hours(h) => h,
            Self::Days(d) => d * 24,
        }
    }

    /// Length in whole days, rounded down.
    #[must_use]
    pub const fn days(self) -> u32 {
        self.hours() / 24
    }

    /// e.g. "5 hours", "1 day".
    #[must_use]
    pub fn description(self) -> String {
        match self {
            Self::Hours(1) => "1 hour".to_string(),
            Self::Hours(h) => format!("{h} hours"),
            Self::Days(1) => "1 day".to_string(),
            Self::Days(d) => format!("{d} days"),
        }
    }
}

/// One quota dimension a provider reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "camelCase")]
pub enum QuotaType {
    Session,
    Weekly,
    ModelSpecific(String),
    TimeLimit(String),
}

impl QuotaType {
    /// Label for display, e.g. "Session" or "Opus".
    #[must_use]
    pub fn display_name(&self) -> String {
        match self {
            Self::Session => "Session".to_string(),
            Self::Weekly => "Weekly".to_string(),
            Self::ModelSpecific(name) | Self::TimeLimit(name) => capitalize(name),
        }
    }

    /// Model name for model-specific quotas.
    #[must_use]
    pub fn model_name(&self) -> Option<&str> {
        match self {
            Self::ModelSpecific(name) => Some(name),
            _ => None,
        }
    }

    /// Renewal period. Sessions renew every five hours, everything else weekly.
    #[must_use]
    pub const fn duration(&self) -> QuotaDuration {
        match self {
            Self::Session => QuotaDuration::Hours(5),
            Self::Weekly | Self::ModelSpecific(_) | Self::TimeLimit(_) => QuotaDuration::Days(7),
        }
    }
}

impl fmt::Display for QuotaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    chars.next().map_or_else(String::new, |first| {
        first.to_uppercase().chain(chars).collect()
    })
}

// =============================================================================
// Quota Status
// =============================================================================

/// Health of a quota, ordered from best to worst.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum QuotaStatus {
    #[default]
    Healthy,
    Warning,
    Critical,
    Depleted,
}

impl QuotaStatus {
    /// Status for a percent-remaining value.
    ///
    /// Bands are closed on their lower end: 50 is healthy, 20 is warning.
    #[must_use]
    pub fn from_percent(percent_remaining: f64) -> Self {
        if percent_remaining <= 0.0 {
            Self::Depleted
        } else if percent_remaining < 20.0 {
            Self::Critical
        } else if percent_remaining < 50.0 {
            Self::Warning
        } else {
            Self::Healthy
        }
    }

    /// Whether this status requires user attention.
    #[must_use]
    pub const fn needs_attention(self) -> bool {
        !matches!(self, Self::Healthy)
    }
}

// =============================================================================
// Usage Quota
// =============================================================================

/// One quota dimension within a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageQuota {
    pub quota_type: QuotaType,

    /// Always within `0.0..=100.0`.
    pub percent_remaining: f64,

    pub provider_id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub resets_at: Option<DateTime<Utc>>,

    /// Human description of the reset. May be present without `resets_at`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reset_text: Option<String>,
}

impl UsageQuota {
    /// Create a quota, clamping `percent_remaining` into range.
    #[must_use]
    pub fn new(quota_type: QuotaType, percent_remaining: f64, provider_id: impl Into<String>) -> Self {
        Self {
            quota_type,
            percent_remaining: clamp_percent(percent_remaining),
            provider_id: provider_id.into(),
            resets_at: None,
            reset_text: None,
        }
    }

    /// Build from a "percent used" figure.
    #[must_use]
    pub fn from_used(quota_type: QuotaType, used_percent: f64, provider_id: impl Into<String>) -> Self {
        Self::new(quota_type, 100.0 - used_percent, provider_id)
    }

    #[must_use]
    pub const fn with_resets_at(mut self, resets_at: Option<DateTime<Utc>>) -> Self {
        self.resets_at = resets_at;
        self
    }

    #[must_use]
    pub fn with_reset_text(mut self, reset_text: Option<String>) -> Self {
        self.reset_text = reset_text;
        self
    }

    /// Derived health.
    #[must_use]
    pub fn status(&self) -> QuotaStatus {
        QuotaStatus::from_percent(self.percent_remaining)
    }
}

fn clamp_percent(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 100.0)
}

// =============================================================================
// Budget Status
// =============================================================================

/// Spend against a fixed budget, ordered by severity.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum BudgetStatus {
    #[default]
    WithinBudget,
    ApproachingLimit,
    OverBudget,
}

impl BudgetStatus {
    /// Classify `cost` against `budget`.
    ///
    /// A non-positive budget always yields `WithinBudget`.
    #[must_use]
    pub fn from_cost(cost: Decimal, budget: Decimal) -> Self {
        if budget <= Decimal::ZERO {
            return Self::WithinBudget;
        }
        let percent_used = cost / budget * Decimal::ONE_HUNDRED;
        if percent_used >= Decimal::ONE_HUNDRED {
            Self::OverBudget
        } else if percent_used >= Decimal::from(80) {
            Self::ApproachingLimit
        } else {
            Self::WithinBudget
        }
    }

    /// Text shown on status badges.
    #[must_use]
    pub const fn badge_text(self) -> &'static str {
        match self {
            Self::WithinBudget => "ON TRACK",
            Self::ApproachingLimit => "NEAR LIMIT",
            Self::OverBudget => "OVER BUDGET",
        }
    }

    #[must_use]
    pub const fn needs_attention(self) -> bool {
        !matches!(self, Self::WithinBudget)
    }
}

// =============================================================================
// Cost Usage
// =============================================================================

/// Pay-per-use or overage spend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostUsage {
    pub total_cost: Decimal,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub budget: Option<Decimal>,

    /// Seconds spent in API calls.
    #[serde(default)]
    pub api_duration: f64,

    /// Wall-clock seconds.
    #[serde(default)]
    pub wall_duration: f64,

    #[serde(default)]
    pub lines_added: u32,

    #[serde(default)]
    pub lines_removed: u32,
}

impl CostUsage {
    /// Cost with no durations or line counts.
    #[must_use]
    pub const fn new(total_cost: Decimal) -> Self {
        Self {
            total_cost,
            budget: None,
            api_duration: 0.0,
            wall_duration: 0.0,
            lines_added: 0,
            lines_removed: 0,
        }
    }

    #[must_use]
    pub const fn with_budget(mut self, budget: Option<Decimal>) -> Self {
        self.budget = budget;
        self
    }

    /// "$0.55"
    #[must_use]
    pub fn formatted_cost(&self) -> String {
        format!("${:.2}", self.total_cost.round_dp(2))
    }

    /// "6m 19.7s"
    #[must_use]
    pub fn formatted_api_duration(&self) -> String {
        format_duration(self.api_duration)
    }

    /// "6h 33m 10.2s"
    #[must_use]
    pub fn formatted_wall_duration(&self) -> String {
        format_duration(self.wall_duration)
    }

    /// "+10 / -5 lines"
    #[must_use]
    pub fn formatted_code_changes(&self) -> String {
        format!("+{} / -{} lines", self.lines_added, self.lines_removed)
    }

    /// Percent of the known budget spent, or `None` without a positive budget.
    #[must_use]
    pub fn budget_percent_used(&self) -> Option<Decimal> {
        let budget = self.budget.filter(|b| *b > Decimal::ZERO)?;
        Some(self.total_cost / budget * Decimal::ONE_HUNDRED)
    }

    /// Budget status, only meaningful when a positive budget is known.
    #[must_use]
    pub fn budget_status(&self) -> Option<BudgetStatus> {
        let budget = self.budget.filter(|b| *b > Decimal::ZERO)?;
        Some(BudgetStatus::from_cost(self.total_cost, budget))
    }
}

/// Rounded to tenths of a second before splitting, so 59.96s carries into
/// the minute instead of printing "60.0s".
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn format_duration(seconds: f64) -> String {
    let tenths = (seconds.max(0.0) * 10.0).round() as u64;
    let hours = tenths / 36_000;
    let minutes = tenths / 600 % 60;
    let secs = tenths % 600;
    let secs = format!("{}.{}s", secs / 10, secs % 10);
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}")
    } else if minutes > 0 {
        format!("{minutes}m {secs}")
    } else {
        secs
    }
}

// =============================================================================
// Usage Snapshot
// =============================================================================

/// One provider's usage picture at a point in time.
///
/// Built once per successful probe and never mutated; the next probe produces
/// a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    pub provider_id: String,

    /// Extraction order.
    #[serde(default)]
    pub quotas: Vec<UsageQuota>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_usage: Option<CostUsage>,

    pub captured_at: DateTime<Utc>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_email: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub account_organization: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub login_method: Option<String>,

    pub account_type: AccountType,
}

impl UsageSnapshot {
    /// Quota-bearing snapshot captured now.
    #[must_use]
    pub fn with_quotas(provider_id: impl Into<String>, quotas: Vec<UsageQuota>) -> Self {
        Self {
            provider_id: provider_id.into(),
            quotas,
            cost_usage: None,
            captured_at: Utc::now(),
            account_email: None,
            account_organization: None,
            login_method: None,
            account_type: AccountType::Max,
        }
    }

    /// Cost-bearing (pay-per-use) snapshot captured now.
    #[must_use]
    pub fn with_cost(provider_id: impl Into<String>, cost: CostUsage) -> Self {
        Self {
            cost_usage: Some(cost),
            account_type: AccountType::Api,
            ..Self::with_quotas(provider_id, Vec::new())
        }
    }

    /// Placeholder with neither quotas nor cost. Always healthy.
    #[must_use]
    pub fn empty(provider_id: impl Into<String>) -> Self {
        Self::with_quotas(provider_id, Vec::new())
    }

    #[must_use]
    pub fn with_identity(
        mut self,
        email: Option<String>,
        organization: Option<String>,
        login_method: Option<String>,
    ) -> Self {
        self.account_email = email;
        self.account_organization = organization;
        self.login_method = login_method;
        self
    }

    #[must_use]
    pub const fn with_account_type(mut self, account_type: AccountType) -> Self {
        self.account_type = account_type;
        self
    }

    #[must_use]
    pub fn with_cost_usage(mut self, cost: Option<CostUsage>) -> Self {
        self.cost_usage = cost;
        self
    }

    /// First quota of the given type.
    #[must_use]
    pub fn quota(&self, quota_type: &QuotaType) -> Option<&UsageQuota> {
        self.quotas.iter().find(|q| &q.quota_type == quota_type)
    }

    #[must_use]
    pub fn session_quota(&self) -> Option<&UsageQuota> {
        self.quota(&QuotaType::Session)
    }

    #[must_use]
    pub fn weekly_quota(&self) -> Option<&UsageQuota> {
        self.quota(&QuotaType::Weekly)
    }

    #[must_use]
    pub fn model_specific_quotas(&self) -> Vec<&UsageQuota> {
        self.quotas
            .iter()
            .filter(|q| matches!(q.quota_type, QuotaType::ModelSpecific(_)))
            .collect()
    }

    /// Quota with the least remaining.
    #[must_use]
    pub fn lowest_quota(&self) -> Option<&UsageQuota> {
        self.quotas
            .iter()
            .min_by(|a, b| a.percent_remaining.total_cmp(&b.percent_remaining))
    }

    /// Worst status across all quotas; healthy when there are none.
    #[must_use]
    pub fn overall_status(&self) -> QuotaStatus {
        self.quotas
            .iter()
            .map(UsageQuota::status)
            .max()
            .unwrap_or_default()
    }

    /// Neither quotas nor cost.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty() && self.cost_usage.is_none()
    }

    #[must_use]
    pub fn age(&self) -> Duration {
        Utc::now().signed_duration_since(self.captured_at)
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.age().num_seconds() > STALE_AFTER_SECS
    }

    /// "Just now", "2m ago", "2h ago".
    #[must_use]
    pub fn age_description(&self) -> String {
        let age = self.age();
        if age.num_seconds() < 60 {
            "Just now".to_string()
        } else if age.num_minutes() < 60 {
            format!("{}m ago", age.num_minutes())
        } else {
            format!("{}h ago", age.num_hours())
        }
    }
}
