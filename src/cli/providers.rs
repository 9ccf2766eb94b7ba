//! Providers command implementation.

use serde::Serialize;

use crate::core::pipeline::availability;
use crate::core::provider::{Provider, ProviderRegistry};
use crate::error::Result;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReport {
    pub provider: Provider,
    pub display_name: &'static str,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<&'static str>,
}

/// Build the availability report for every registered provider.
pub async fn collect(registry: &ProviderRegistry) -> Vec<ProviderReport> {
    availability(registry)
        .await
        .into_iter()
        .map(|(provider, available)| ProviderReport {
            provider,
            display_name: provider.display_name(),
            available,
            hint: (!available).then(|| provider.install_suggestion()),
        })
        .collect()
}

/// Print registered providers and whether each can run.
///
/// # Errors
///
/// Only when JSON serialization fails.
pub async fn execute(registry: &ProviderRegistry, json: bool, pretty: bool) -> Result<()> {
    let reports = collect(registry).await;

    if json {
        let out = if pretty {
            serde_json::to_string_pretty(&reports)?
        } else {
            serde_json::to_string(&reports)?
        };
        println!("{out}");
        return Ok(());
    }

    for report in &reports {
        let state = if report.available { "available" } else { "unavailable" };
        match report.hint {
            Some(hint) => println!("{:<8} {state}  ({hint})", report.provider.id()),
            None => println!("{:<8} {state}", report.provider.id()),
        }
    }
    Ok(())
}
