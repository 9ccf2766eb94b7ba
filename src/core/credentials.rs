//! Read-only access to provider credentials.
//!
//! Tokens live in the environment, the OS keyring, or files written by the
//! providers' own CLIs. Nothing here ever writes a credential.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::error::ProbeError;
use crate::storage::paths::home_dir;

/// Keyring service name tokens are stored under.
pub const KEYRING_SERVICE: &str = "quotaprobe";

/// Location of the Gemini CLI's OAuth file, relative to the home directory.
pub const GEMINI_OAUTH_PATH: &str = ".gemini/oauth_creds.json";

// =============================================================================
// Token Sources
// =============================================================================

/// Looks up a bearer token for a provider.
pub trait TokenSource: Send + Sync {
    fn token(&self, provider_id: &str) -> Option<String>;
}

/// Environment variables, keyed by provider id.
#[derive(Debug, Clone, Default)]
pub struct EnvTokenSource {
    vars: Vec<(String, String)>,
}

impl EnvTokenSource {
    #[must_use]
    pub const fn new() -> Self {
        Self { vars: Vec::new() }
    }

    /// Read `var` for `provider_id`.
    #[must_use]
    pub fn with_var(mut self, provider_id: impl Into<String>, var: impl Into<String>) -> Self {
        self.vars.push((provider_id.into(), var.into()));
        self
    }

    /// Well-known variables for the built-in providers.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with_var("zai", "ZAI_API_KEY")
            .with_var("zai", "Z_AI_API_KEY")
            .with_var("gemini", "GEMINI_ACCESS_TOKEN")
    }
}

impl TokenSource for EnvTokenSource {
    fn token(&self, provider_id: &str) -> Option<String> {
        self.vars
            .iter()
            .filter(|(id, _)| id == provider_id)
            .find_map(|(_, var)| std::env::var(var).ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }
}

/// OS keyring entries named `<provider>-token` under [`KEYRING_SERVICE`].
#[derive(Debug, Clone)]
pub struct KeyringTokenSource {
    service: String,
}

impl KeyringTokenSource {
    #[must_use]
    pub fn new() -> Self {
        Self::with_service(KEYRING_SERVICE)
    }

    #[must_use]
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }
}

impl Default for KeyringTokenSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenSource for KeyringTokenSource {
    fn token(&self, provider_id: &str) -> Option<String> {
        let entry = keyring::Entry::new(&self.service, &format!("{provider_id}-token")).ok()?;
        match entry.get_password() {
            Ok(token) => Some(token),
            Err(keyring::Error::NoEntry) => None,
            Err(e) => {
                tracing::debug!(provider = provider_id, error = %e, "keyring lookup failed");
                None
            }
        }
    }
}

/// Tries each source in order.
#[derive(Default)]
pub struct ChainTokenSource {
    sources: Vec<Box<dyn TokenSource>>,
}

impl ChainTokenSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, source: impl TokenSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Environment first, then the keyring.
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with(EnvTokenSource::standard())
            .with(KeyringTokenSource::new())
    }
}

impl TokenSource for ChainTokenSource {
    fn token(&self, provider_id: &str) -> Option<String> {
        self.sources.iter().find_map(|s| s.token(provider_id))
    }
}

impl std::fmt::Debug for ChainTokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainTokenSource")
            .field("sources", &self.sources.len())
            .finish()
    }
}

/// Fixed tokens, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenSource {
    tokens: Vec<(String, String)>,
}

impl StaticTokenSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, provider_id: impl Into<String>, token: impl Into<String>) -> Self {
        self.tokens.push((provider_id.into(), token.into()));
        self
    }
}

impl TokenSource for StaticTokenSource {
    fn token(&self, provider_id: &str) -> Option<String> {
        self.tokens
            .iter()
            .find(|(id, _)| id == provider_id)
            .map(|(_, token)| token.clone())
    }
}

// =============================================================================
// Gemini OAuth File
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawOAuthFile {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    /// Epoch milliseconds.
    #[serde(default)]
    expiry_date: Option<f64>,
}

/// Contents of `~/.gemini/oauth_creds.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeminiOAuthFile {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub expiry: Option<DateTime<Utc>>,
}

impl GeminiOAuthFile {
    /// Default location under the user's home directory.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        home_dir().map(|h| h.join(GEMINI_OAUTH_PATH))
    }

    /// Load and decode the file.
    ///
    /// # Errors
    ///
    /// - missing file → [`ProbeError::AuthenticationRequired`]
    /// - invalid JSON → [`ProbeError::ParseFailed`]
    pub fn load(path: &Path) -> Result<Self, ProbeError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::debug!(path = %path.display(), error = %e, "Gemini credentials unreadable");
            ProbeError::AuthenticationRequired
        })?;
        Self::parse(&content)
    }

    /// Decode file contents.
    ///
    /// # Errors
    ///
    /// [`ProbeError::ParseFailed`] on invalid JSON.
    pub fn parse(content: &str) -> Result<Self, ProbeError> {
        let raw: RawOAuthFile = serde_json::from_str(content)
            .map_err(|_| ProbeError::ParseFailed("Invalid credentials file".to_string()))?;

        #[allow(clippy::cast_possible_truncation)]
        let expiry = raw
            .expiry_date
            .and_then(|ms| DateTime::from_timestamp_millis(ms as i64));

        Ok(Self {
            access_token: raw.access_token.filter(|t| !t.is_empty()),
            refresh_token: raw.refresh_token,
            expiry,
        })
    }

    /// Whether the access token's expiry has passed. Unknown expiry counts as
    /// not expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expiry.is_some_and(|at| at <= now)
    }

    /// The access token, or [`ProbeError::AuthenticationRequired`].
    ///
    /// # Errors
    ///
    /// When the file carries no token.
    pub fn require_token(&self) -> Result<&str, ProbeError> {
        self.access_token
            .as_deref()
            .ok_or(ProbeError::AuthenticationRequired)
    }
}
