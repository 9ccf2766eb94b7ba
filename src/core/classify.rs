//! Account-tier and known-failure classification of normalized text.

use crate::core::extract::{extract_login_method, extract_trust_folder};
use crate::core::models::AccountType;
use crate::error::ProbeError;

/// Tier assumed when nothing in the transcript identifies the account.
///
/// Subscription tiers are far more common among people running the CLI
/// interactively, but this is a guess and is logged as a warning every time
/// it is used.
pub const UNRECOGNIZED_ACCOUNT_FALLBACK: AccountType = AccountType::Max;

const TRUST_PROMPT: &str = "do you trust the files in this folder?";

/// Tier banners, most specific first.
const TIER_HEADERS: &[(&str, AccountType)] = &[
    ("claude api account", AccountType::Api),
    ("claude max account", AccountType::Max),
    ("claude pro account", AccountType::Pro),
];

/// Wording older CLI versions used for subscription accounts.
const LEGACY_MAX_PHRASES: &[&str] = &["max subscription"];

const PAY_PER_USE_PHRASES: &[&str] = &["no usage quotas", "use /cost to see", "api account"];

const AUTH_MARKERS: &[&str] = &[
    "token_expired",
    "token has expired",
    "authentication_error",
    "login with google",
    "please run /login",
    "not logged in",
];

const NOT_READY_MARKERS: &[&str] = &["data not available yet"];

/// Classify the account tier from a `/status`-style transcript.
///
/// Priority: tier banner, then the "Login method" field, then legacy
/// subscription wording, then presence of quota percentages, then
/// pay-per-use phrases, then
/// [`UNRECOGNIZED_ACCOUNT_FALLBACK`].
#[must_use]
pub fn classify_account_type(text: &str) -> AccountType {
    let lower = text.to_lowercase();

    if let Some((header, tier)) = TIER_HEADERS.iter().find(|(h, _)| lower.contains(h)) {
        tracing::debug!(header, ?tier, "account tier from banner");
        return *tier;
    }

    if let Some(method) = extract_login_method(text)
        && let Some(tier) = tier_from_login_method(&method)
    {
        tracing::debug!(%method, ?tier, "account tier from login method");
        return tier;
    }

    if LEGACY_MAX_PHRASES.iter().any(|p| lower.contains(p)) {
        tracing::debug!("account tier from legacy subscription wording");
        return AccountType::Max;
    }

    if has_quota_section(&lower) {
        tracing::debug!("account tier from quota section");
        return AccountType::Max;
    }

    if PAY_PER_USE_PHRASES.iter().any(|p| lower.contains(p)) {
        tracing::debug!("account tier from pay-per-use wording");
        return AccountType::Api;
    }

    tracing::warn!(
        fallback = ?UNRECOGNIZED_ACCOUNT_FALLBACK,
        "could not determine account type, using fallback"
    );
    UNRECOGNIZED_ACCOUNT_FALLBACK
}

fn tier_from_login_method(method: &str) -> Option<AccountType> {
    let method = method.to_lowercase();
    if method.contains("api") || method.contains("console") {
        Some(AccountType::Api)
    } else if method.contains("max") {
        Some(AccountType::Max)
    } else if method.contains("pro") {
        Some(AccountType::Pro)
    } else {
        None
    }
}

fn has_percent_data(lower: &str) -> bool {
    lower.contains("% left") || lower.contains("% used")
}

fn has_quota_section(lower: &str) -> bool {
    lower.contains("current session") && has_percent_data(lower)
}

// =============================================================================
// Known Errors
// =============================================================================

/// Failure signatures recognized in tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// A trust prompt is still on screen; carries the folder if it was shown.
    FolderTrustRequired(Option<String>),
    AuthenticationRequired,
    UpdateRequired,
    DataNotReady,
}

impl From<ErrorKind> for ProbeError {
    fn from(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::FolderTrustRequired(folder) => Self::FolderTrustRequired { folder },
            ErrorKind::AuthenticationRequired => Self::AuthenticationRequired,
            ErrorKind::UpdateRequired => Self::UpdateRequired("CLI update required".to_string()),
            ErrorKind::DataNotReady => Self::ParseFailed("Data not available yet".to_string()),
        }
    }
}

/// First known failure signature in `text`, checked in a fixed order:
/// unanswered trust prompt, expired auth, update required, data not ready.
///
/// A trust prompt only counts when no quota section follows it, since an
/// answered prompt stays in the transcript. Likewise an update notice only
/// counts when no percentage data was printed.
#[must_use]
pub fn detect_known_error(text: &str) -> Option<ErrorKind> {
    let lower = text.to_lowercase();

    if lower.contains(TRUST_PROMPT) && !lower.contains("current session") {
        return Some(ErrorKind::FolderTrustRequired(extract_trust_folder(text)));
    }

    if AUTH_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(ErrorKind::AuthenticationRequired);
    }

    if lower.contains("update available") && !has_percent_data(&lower) {
        return Some(ErrorKind::UpdateRequired);
    }

    if NOT_READY_MARKERS.iter().any(|m| lower.contains(m)) {
        return Some(ErrorKind::DataNotReady);
    }

    None
}
