//! Error types for quotaprobe.
//!
//! Uses `thiserror` for structured error types that map to exit codes.
//!
//! ## Error Taxonomy
//!
//! Two layers of errors exist:
//! - [`ProbeError`]: the terminal reason a single probe attempt failed. Produced
//!   only by the process runner, the RPC client, HTTP calls and provider probes.
//!   Extractors and classifiers never fail; they return `Option`.
//! - [`QuotaProbeError`]: the crate-wide error that wraps `ProbeError` and adds
//!   configuration, I/O and composition failures.
//!
//! Each error has a stable error code (e.g., `QP-A001`) for programmatic handling.

use thiserror::Error;

// =============================================================================
// Error Categories
// =============================================================================

/// High-level error categories for classification and routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Expired or missing credentials.
    Authentication,
    /// The tool answered but the answer was unusable.
    Provider,
    /// Config file parse errors or invalid values.
    Configuration,
    /// Missing binaries, launch failures, timeouts.
    Environment,
    /// Bugs, unexpected state, unclassified.
    Internal,
}

impl ErrorCategory {
    /// Returns a human-readable description of the category.
    #[must_use]
    pub const fn description(&self) -> &'static str {
        match self {
            Self::Authentication => "Authentication error",
            Self::Provider => "Provider error",
            Self::Configuration => "Configuration error",
            Self::Environment => "Environment error",
            Self::Internal => "Internal error",
        }
    }

    /// Returns a short code prefix for this category.
    #[must_use]
    pub const fn code_prefix(&self) -> &'static str {
        match self {
            Self::Authentication => "A",
            Self::Provider => "P",
            Self::Configuration => "C",
            Self::Environment => "E",
            Self::Internal => "X",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

// =============================================================================
// Exit Codes
// =============================================================================

/// Process exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExitCode {
    /// Success
    Success = 0,
    /// Unexpected failure
    GeneralError = 1,
    /// Provider CLI not installed
    BinaryNotFound = 2,
    /// Output obtained but unusable, or invalid configuration
    ParseError = 3,
    /// Timeout
    Timeout = 4,
    /// Credentials expired or missing
    AuthRequired = 5,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as Self
    }
}

// =============================================================================
// Probe Errors
// =============================================================================

/// Why a single probe attempt failed.
///
/// None of these are retried inside the engine. Retrying across time is the
/// caller's concern.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Required executable is absent from the search path.
    #[error("binary not found: {0}")]
    BinaryNotFound(String),

    /// Expired or missing credentials, detected in output or via HTTP 401.
    #[error("authentication required")]
    AuthenticationRequired,

    /// An interactive trust prompt appeared and was not answered.
    #[error("folder trust required{}", folder.as_ref().map(|f| format!(" for {f}")).unwrap_or_default())]
    FolderTrustRequired { folder: Option<String> },

    /// The tool reports it is out of date and cannot serve quota data.
    #[error("update required: {0}")]
    UpdateRequired(String),

    /// The bounded operation did not complete in time.
    #[error("timed out")]
    Timeout,

    /// OS-level launch/IO failure, or non-2xx HTTP with no better classification.
    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    /// Output was obtained but lacked the mandatory fields.
    #[error("parse failed: {0}")]
    ParseFailed(String),
}

impl ProbeError {
    /// Map to an exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::BinaryNotFound(_) => ExitCode::BinaryNotFound,
            Self::AuthenticationRequired | Self::FolderTrustRequired { .. } => {
                ExitCode::AuthRequired
            }
            Self::ParseFailed(_) => ExitCode::ParseError,
            Self::Timeout => ExitCode::Timeout,
            Self::UpdateRequired(_) | Self::ExecutionFailed(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::AuthenticationRequired | Self::FolderTrustRequired { .. } => {
                ErrorCategory::Authentication
            }
            Self::ParseFailed(_) | Self::UpdateRequired(_) => ErrorCategory::Provider,
            Self::BinaryNotFound(_) | Self::Timeout | Self::ExecutionFailed(_) => {
                ErrorCategory::Environment
            }
        }
    }

    /// Returns a stable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::AuthenticationRequired => "QP-A001",
            Self::FolderTrustRequired { .. } => "QP-A002",
            Self::ParseFailed(_) => "QP-P001",
            Self::UpdateRequired(_) => "QP-P002",
            Self::BinaryNotFound(_) => "QP-E001",
            Self::Timeout => "QP-E002",
            Self::ExecutionFailed(_) => "QP-E003",
        }
    }

    /// Short remediation hint for a human reader.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        match self {
            Self::BinaryNotFound(_) => Some("install the CLI or set providers.<id>.binary"),
            Self::AuthenticationRequired => Some("log in again with the provider's CLI"),
            Self::FolderTrustRequired { .. } => {
                Some("open the CLI once in the probe directory and accept the trust prompt")
            }
            Self::UpdateRequired(_) => Some("update the provider's CLI"),
            Self::Timeout | Self::ExecutionFailed(_) | Self::ParseFailed(_) => None,
        }
    }
}

// =============================================================================
// Crate Error
// =============================================================================

/// Main error type for quotaprobe operations.
#[derive(Error, Debug)]
pub enum QuotaProbeError {
    // ==========================================================================
    // Probe failures
    // ==========================================================================
    /// A provider probe failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),

    /// A probe did not finish within the pipeline's bound.
    #[error("probe timeout after {seconds}s for {provider}")]
    TimeoutWithProvider { provider: String, seconds: u64 },

    // ==========================================================================
    // Configuration errors
    // ==========================================================================
    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Unknown provider id.
    #[error("invalid provider: {0}")]
    InvalidProvider(String),

    /// Provider is registered but disabled in config.
    #[error("provider disabled: {0}")]
    ProviderDisabled(String),

    // ==========================================================================
    // I/O errors
    // ==========================================================================
    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Catch-all for other errors.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl QuotaProbeError {
    /// Map error to exit code.
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Probe(e) => e.exit_code(),
            Self::TimeoutWithProvider { .. } => ExitCode::Timeout,
            Self::Config(_) | Self::InvalidProvider(_) | Self::ProviderDisabled(_) => {
                ExitCode::ParseError
            }
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ExitCode::GeneralError,
        }
    }

    /// Returns the error category for classification and routing.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Probe(e) => e.category(),
            Self::TimeoutWithProvider { .. } => ErrorCategory::Environment,
            Self::Config(_) | Self::InvalidProvider(_) | Self::ProviderDisabled(_) => {
                ErrorCategory::Configuration
            }
            Self::Io(_) | Self::Json(_) | Self::Other(_) => ErrorCategory::Internal,
        }
    }

    /// Returns a stable error code for programmatic handling.
    ///
    /// Format: `QP-{category}{number}`.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::Probe(e) => e.error_code(),
            Self::TimeoutWithProvider { .. } => "QP-E010",
            Self::Config(_) => "QP-C001",
            Self::InvalidProvider(_) => "QP-C010",
            Self::ProviderDisabled(_) => "QP-C011",
            Self::Io(_) => "QP-X001",
            Self::Json(_) => "QP-X002",
            Self::Other(_) => "QP-X099",
        }
    }

    /// Whether trying again later could plausibly succeed.
    ///
    /// Advisory only; the engine never retries on its own.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Probe(ProbeError::Timeout | ProbeError::ExecutionFailed(_) | ProbeError::ParseFailed(_))
                | Self::TimeoutWithProvider { .. }
        )
    }

    /// Returns the provider id if this error is provider-specific.
    #[must_use]
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::TimeoutWithProvider { provider, .. } => Some(provider),
            Self::InvalidProvider(p) | Self::ProviderDisabled(p) => Some(p),
            _ => None,
        }
    }

    /// The underlying probe error, if any.
    #[must_use]
    pub const fn as_probe(&self) -> Option<&ProbeError> {
        match self {
            Self::Probe(e) => Some(e),
            _ => None,
        }
    }
}

/// Result type alias for quotaprobe operations.
pub type Result<T> = std::result::Result<T, QuotaProbeError>;

/// Result of one probe attempt.
pub type ProbeResult<T> = std::result::Result<T, ProbeError>;
