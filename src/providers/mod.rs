//! Provider-specific probes.
//!
//! Each provider has its own submodule implementing [`UsageProbe`].
//!
//! [`UsageProbe`]: crate::core::provider::UsageProbe

pub mod claude;
pub mod codex;
pub mod gemini;
pub mod zai;

pub use claude::ClaudeProbe;
pub use codex::CodexProbe;
pub use gemini::GeminiProbe;
pub use zai::ZaiProbe;

pub use crate::core::provider::Provider;
