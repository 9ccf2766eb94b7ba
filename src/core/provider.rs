//! Provider catalogue, the probe capability, and the probe registry.
//!
//! Every provider is one [`UsageProbe`] implementation. The composition root
//! builds a [`ProviderRegistry`] once and passes it to whatever needs lookup.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::credentials::{ChainTokenSource, TokenSource};
use crate::core::models::UsageSnapshot;
use crate::core::pty::{PortablePtyRunner, TerminalRunner};
use crate::core::rpc::{RpcLauncher, StdioRpcLauncher};
use crate::error::{ProbeError, ProbeResult, QuotaProbeError, Result};
use crate::providers::{ClaudeProbe, CodexProbe, GeminiProbe, ZaiProbe};
use crate::storage::config::ResolvedConfig;

/// Default bound on one probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(20);

// =============================================================================
// Provider Enum
// =============================================================================

/// Supported providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Claude,
    Codex,
    Gemini,
    Zai,
}

impl Provider {
    /// All providers in display order.
    pub const ALL: &'static [Self] = &[Self::Claude, Self::Codex, Self::Gemini, Self::Zai];

    /// Stable id used in config, CLI arguments and snapshots.
    #[must_use]
    pub const fn id(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::Gemini => "gemini",
            Self::Zai => "zai",
        }
    }

    /// Display name for human output.
    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::Claude => "Claude",
            Self::Codex => "Codex",
            Self::Gemini => "Gemini",
            Self::Zai => "z.ai",
        }
    }

    /// Executable the probe drives, if any.
    #[must_use]
    pub const fn default_binary(self) -> Option<&'static str> {
        match self {
            Self::Claude => Some("claude"),
            Self::Codex => Some("codex"),
            Self::Gemini => Some("gemini"),
            Self::Zai => None,
        }
    }

    /// Parse from an id, case-insensitively.
    ///
    /// # Errors
    ///
    /// [`QuotaProbeError::InvalidProvider`] for unknown ids.
    pub fn from_id(id: &str) -> Result<Self> {
        let lower = id.trim().to_lowercase();
        Self::ALL
            .iter()
            .find(|p| p.id() == lower)
            .copied()
            .ok_or_else(|| QuotaProbeError::InvalidProvider(id.to_string()))
    }

    /// Comma-separated list of valid ids, for error messages.
    #[must_use]
    pub fn valid_ids() -> String {
        Self::ALL
            .iter()
            .map(|p| p.id())
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Installation hint shown when the binary is missing.
    #[must_use]
    pub const fn install_suggestion(self) -> &'static str {
        match self {
            Self::Claude => "Install with: npm install -g @anthropic-ai/claude-code",
            Self::Codex => "Install with: npm install -g @openai/codex",
            Self::Gemini => "Install with: npm install -g @google/gemini-cli",
            Self::Zai => "Set ZAI_API_KEY or store a token in the keyring",
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

// =============================================================================
// Probe Capability
// =============================================================================

/// One provider's way of producing a [`UsageSnapshot`].
///
/// Both methods may be called repeatedly and concurrently across providers.
#[async_trait]
pub trait UsageProbe: Send + Sync {
    /// Which provider this probes.
    fn provider(&self) -> Provider;

    /// Stable provider id.
    fn id(&self) -> &'static str {
        self.provider().id()
    }

    /// Whether the probe can run at all (binary resolvable, token present).
    async fn is_available(&self) -> bool;

    /// Run one probe cycle.
    async fn probe(&self) -> ProbeResult<UsageSnapshot>;

    /// Total time one [`Self::probe`] call spends across all of its tiers.
    /// `None` leaves the bound to the caller.
    fn time_budget(&self) -> Option<Duration> {
        None
    }
}

/// Time left for the tiers of one probe run.
///
/// A probe creates one at the start of [`UsageProbe::probe`] and hands each
/// tier a slice of what remains, so a hung primary tier cannot starve its
/// fallback.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
}

impl Deadline {
    #[must_use]
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
        }
    }

    /// Time until the deadline, zero once it has passed.
    #[must_use]
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    /// Half of the remaining time, for a tier that must leave room for a
    /// fallback.
    #[must_use]
    pub fn half(&self) -> Duration {
        self.remaining() / 2
    }

    /// Remaining time for the last tier.
    ///
    /// # Errors
    ///
    /// [`ProbeError::Timeout`] when nothing is left.
    pub fn require(&self) -> ProbeResult<Duration> {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return Err(ProbeError::Timeout);
        }
        Ok(remaining)
    }
}

/// Per-provider inputs resolved from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    /// Binary name or path. Empty for HTTP-only providers.
    pub binary: String,
    pub timeout: Duration,
    /// HTTP endpoint override.
    pub endpoint: Option<String>,
}

impl ProbeSettings {
    /// Built-in settings for `provider`.
    #[must_use]
    pub fn defaults(provider: Provider) -> Self {
        Self {
            binary: provider.default_binary().unwrap_or_default().to_string(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            endpoint: None,
        }
    }

    #[must_use]
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

/// Collaborators shared by the probes.
#[derive(Clone)]
pub struct ProbeDeps {
    pub runner: Arc<dyn TerminalRunner>,
    pub rpc: Arc<dyn RpcLauncher>,
    pub tokens: Arc<dyn TokenSource>,
}

impl ProbeDeps {
    /// Real PTY runner, stdio RPC, and env-then-keyring tokens.
    #[must_use]
    pub fn system() -> Self {
        Self {
            runner: Arc::new(PortablePtyRunner::new()),
            rpc: Arc::new(StdioRpcLauncher),
            tokens: Arc::new(ChainTokenSource::standard()),
        }
    }
}

impl std::fmt::Debug for ProbeDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProbeDeps").finish_non_exhaustive()
    }
}

// =============================================================================
// Provider Registry
// =============================================================================

/// Explicit mapping from provider to probe implementation.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    probes: BTreeMap<Provider, Arc<dyn UsageProbe>>,
}

impl ProviderRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `probe`, replacing any probe for the same provider.
    pub fn register(&mut self, probe: Arc<dyn UsageProbe>) {
        self.probes.insert(probe.provider(), probe);
    }

    #[must_use]
    pub fn with(mut self, probe: Arc<dyn UsageProbe>) -> Self {
        self.register(probe);
        self
    }

    /// Build every enabled provider's probe with the system collaborators.
    #[must_use]
    pub fn from_config(config: &ResolvedConfig) -> Self {
        Self::from_config_with(config, &ProbeDeps::system())
    }

    /// Build every enabled provider's probe with the given collaborators.
    #[must_use]
    pub fn from_config_with(config: &ResolvedConfig, deps: &ProbeDeps) -> Self {
        let mut registry = Self::new();
        for &provider in Provider::ALL {
            if !config.is_enabled(provider) {
                tracing::debug!(provider = %provider, "provider disabled in config");
                continue;
            }
            let settings = config.probe_settings(provider);
            registry.register(build_probe(provider, settings, deps));
        }
        registry
    }

    /// Probe for `provider`, if registered.
    #[must_use]
    pub fn get(&self, provider: Provider) -> Option<Arc<dyn UsageProbe>> {
        self.probes.get(&provider).cloned()
    }

    /// Probe for a provider id.
    ///
    /// # Errors
    ///
    /// [`QuotaProbeError::InvalidProvider`] for unknown ids and
    /// [`QuotaProbeError::ProviderDisabled`] for known but unregistered ones.
    pub fn lookup(&self, id: &str) -> Result<Arc<dyn UsageProbe>> {
        let provider = Provider::from_id(id)?;
        self.get(provider)
            .ok_or_else(|| QuotaProbeError::ProviderDisabled(provider.id().to_string()))
    }

    /// Registered providers, in catalogue order.
    #[must_use]
    pub fn providers(&self) -> Vec<Provider> {
        self.probes.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn UsageProbe>> {
        self.probes.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.probes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.probes.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

fn build_probe(provider: Provider, settings: ProbeSettings, deps: &ProbeDeps) -> Arc<dyn UsageProbe> {
    match provider {
        Provider::Claude => Arc::new(ClaudeProbe::new(settings, Arc::clone(&deps.runner))),
        Provider::Codex => Arc::new(CodexProbe::new(
            settings,
            Arc::clone(&deps.runner),
            Arc::clone(&deps.rpc),
        )),
        Provider::Gemini => Arc::new(GeminiProbe::new(
            settings,
            Arc::clone(&deps.runner),
            Arc::clone(&deps.tokens),
        )),
        Provider::Zai => Arc::new(ZaiProbe::new(settings, Arc::clone(&deps.tokens))),
    }
}
