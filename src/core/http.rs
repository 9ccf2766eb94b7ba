//! HTTP client utilities.
//!
//! Provides the shared client and bearer-authenticated JSON helpers used by
//! the API-backed probes. Every failure maps straight to a [`ProbeError`].

use std::time::Duration;

use reqwest::{Client, ClientBuilder, RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ProbeError;

/// Build a configured HTTP client.
///
/// # Errors
///
/// Returns error if client construction fails.
pub fn build_client(timeout: Duration) -> Result<Client, ProbeError> {
    ClientBuilder::new()
        .timeout(timeout)
        .user_agent(format!("quotaprobe/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProbeError::ExecutionFailed(e.to_string()))
}

/// `GET url` with a bearer token, decoding a JSON body.
///
/// # Errors
///
/// See [`send_json`].
pub async fn get_json<T: DeserializeOwned>(
    client: &Client,
    url: &str,
    token: &str,
) -> Result<T, ProbeError> {
    send_json(client.get(url).bearer_auth(token), url).await
}

/// `POST url` with a bearer token and JSON body, decoding a JSON body.
///
/// # Errors
///
/// See [`send_json`].
pub async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
    client: &Client,
    url: &str,
    token: &str,
    body: &B,
) -> Result<T, ProbeError> {
    send_json(client.post(url).bearer_auth(token).json(body), url).await
}

/// Send a prepared request and decode the JSON response.
///
/// # Errors
///
/// - 401 → [`ProbeError::AuthenticationRequired`]
/// - other non-2xx → [`ProbeError::ExecutionFailed`] with `"HTTP <code>"`
/// - request timeout → [`ProbeError::Timeout`]
/// - undecodable body → [`ProbeError::ParseFailed`]
pub async fn send_json<T: DeserializeOwned>(
    request: RequestBuilder,
    url: &str,
) -> Result<T, ProbeError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            ProbeError::Timeout
        } else {
            ProbeError::ExecutionFailed(e.to_string())
        }
    })?;

    let status = response.status();
    tracing::debug!(url, status = status.as_u16(), "HTTP response");
    check_status(status)?;

    response
        .json()
        .await
        .map_err(|e| ProbeError::ParseFailed(e.to_string()))
}

/// Classify a response status.
///
/// # Errors
///
/// Non-success statuses, as documented on [`send_json`].
pub fn check_status(status: StatusCode) -> Result<(), ProbeError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(ProbeError::AuthenticationRequired);
    }
    if !status.is_success() {
        return Err(ProbeError::ExecutionFailed(format!("HTTP {}", status.as_u16())));
    }
    Ok(())
}
