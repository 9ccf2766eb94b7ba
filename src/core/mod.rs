//! Core data models, text extraction, process seams and the probe pipeline.

pub mod ansi;
pub mod classify;
pub mod credentials;
pub mod extract;
pub mod http;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod provider;
pub mod pty;
pub mod rpc;

pub use classify::{ErrorKind, classify_account_type, detect_known_error};
pub use credentials::{ChainTokenSource, EnvTokenSource, GeminiOAuthFile, TokenSource};
pub use models::{
    AccountType, BudgetStatus, CostUsage, QuotaDuration, QuotaStatus, QuotaType, UsageQuota,
    UsageSnapshot,
};
pub use pipeline::{ProbeOutcome, availability, batch_exit_code, probe_all, probe_one};
pub use provider::{ProbeDeps, ProbeSettings, Provider, ProviderRegistry, UsageProbe};
pub use pty::{PortablePtyRunner, PtyRequest, RunError, TerminalRunner, Transcript, TriggerTable};
pub use rpc::{RateLimitRpc, RateLimits, RpcError, RpcLauncher, StdioRpcLauncher};
