//! HTTP API client for the MDP server
//!
//! Provides methods to interact with the MDP backend API.

use crate::api::{endpoints, types::*};
use crate::error::{CliError, Result};
use reqwest::{Client, Response};
use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// API Client Constants
// ============================================================================

/// Default timeout for API requests in seconds.
/// Can be overridden via MDP_API_TIMEOUT_SECS environment variable.
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;

/// Default MDP server URL when not specified via environment variable.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:8200";

/// API client for the MDP server
pub struct ApiClient {
    client: Client,
    base_url: String,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: String) -> Result<Self> {
        let timeout_secs = std::env::var("MDP_API_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_API_TIMEOUT_SECS);

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;

        Ok(Self { client, base_url })
    }

    /// Create from environment variables
    pub fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("MDP_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());

        Self::new(base_url)
    }

    /// Check server health
    pub async fn health_check(&self) -> Result<bool> {
        let url = endpoints::health_url(&self.base_url);

        match self.client.get(&url).send().await {
            Ok(response) => Ok(response.status().is_success()),
            Err(_) => Ok(false),
        }
    }

    /// Trigger an ingestion run
    pub async fn start_run(&self, request: &StartRunRequest) -> Result<StartedRun> {
        let url = endpoints::start_url(&self.base_url);

        let response = self.client.post(&url).json(request).send().await?;

        read_data(response).await
    }

    /// Get the current or most recent run, optionally for one scope
    pub async fn run_status(&self, scope: Option<&str>) -> Result<RunSnapshot> {
        let url = endpoints::status_url(&self.base_url, scope);

        let response = self.client.get(&url).send().await?;

        read_data(response).await
    }

    /// List run history, newest first
    pub async fn list_runs(
        &self,
        scope: Option<&str>,
        limit: Option<i64>,
    ) -> Result<Vec<RunSnapshot>> {
        let url = endpoints::runs_url(&self.base_url, scope, limit);

        let response = self.client.get(&url).send().await?;

        read_data(response).await
    }

    /// Cancel a running ingestion
    pub async fn cancel_run(&self, run_id: Uuid) -> Result<CancelledRun> {
        let url = endpoints::cancel_url(&self.base_url, run_id);

        let response = self.client.post(&url).send().await?;

        read_data(response).await
    }

    /// List configured sources
    pub async fn list_sources(&self, active: Option<bool>) -> Result<Vec<SourceSummary>> {
        let url = endpoints::sources_url(&self.base_url, active);

        let response = self.client.get(&url).send().await?;

        read_data(response).await
    }

    /// Get source details, including a live reachability probe
    pub async fn get_source(&self, id: Uuid) -> Result<SourceDetail> {
        let url = endpoints::source_details_url(&self.base_url, id);

        let response = self.client.get(&url).send().await?;

        read_data(response).await
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Unwrap the response envelope.
///
/// Successful statuses carry `{success, data, meta}`; error statuses carry
/// `{success: false, error: {code, message}}`. Both get mapped here so the
/// command modules only see typed payloads or `CliError`.
async fn read_data<T: serde::de::DeserializeOwned>(response: Response) -> Result<T> {
    let status = response.status();

    if status.is_success() {
        let envelope: ApiResponse<T> = response.json().await?;
        return Ok(envelope.data);
    }

    let body = response.text().await.unwrap_or_default();

    match serde_json::from_str::<ErrorEnvelope>(&body) {
        Ok(envelope) => Err(CliError::api(format!(
            "{} ({})",
            envelope.error.message, envelope.error.code
        ))),
        Err(_) => Err(CliError::api(format!("request failed with HTTP {}", status))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_api_client_creation() {
        let client = ApiClient::new("http://localhost:8200".to_string()).unwrap();
        assert_eq!(client.base_url(), "http://localhost:8200");
    }

    #[test]
    fn test_api_client_from_env() {
        std::env::set_var("MDP_SERVER_URL", "http://test.example.com");
        let client = ApiClient::from_env().unwrap();
        assert_eq!(client.base_url(), "http://test.example.com");
        std::env::remove_var("MDP_SERVER_URL");
    }

    #[tokio::test]
    async fn test_health_check_unreachable() {
        let client = ApiClient::new("http://localhost:9999".to_string()).unwrap();
        let result = client.health_check().await.unwrap();
        assert!(!result);
    }
}
