use std::time::Duration;

use reqwest::Client;
use tracing::debug;

use crate::{
    error::{PipelineError, Result},
    models::endpoint::{CatalogEntry, ServiceEndpoint},
};

/// Resolves logical service names through the discovery catalog.
///
/// Each call hits the catalog; nothing is cached. With one instance per
/// service the first catalog entry is used.
#[derive(Debug, Clone)]
pub struct RegistryClient {
    http_client: Client,
    base_url: String,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| PipelineError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(http_client, base_url))
    }

    pub fn with_client(http_client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http_client,
            base_url,
        }
    }

    pub async fn resolve(&self, service_name: &str) -> Result<ServiceEndpoint> {
        let url = format!("{}/catalog/service/{}", self.base_url, service_name);

        debug!(service = service_name, url = %url, "Resolving service");

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            PipelineError::DiscoveryUnavailable {
                service: service_name.to_string(),
                message: e.to_string(),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::DiscoveryUnavailable {
                service: service_name.to_string(),
                message: format!("catalog lookup returned {}", status),
            });
        }

        let entries: Vec<CatalogEntry> =
            response
                .json()
                .await
                .map_err(|e| PipelineError::DiscoveryUnavailable {
                    service: service_name.to_string(),
                    message: format!("invalid catalog response: {}", e),
                })?;

        let endpoint = entries
            .into_iter()
            .next()
            .map(|entry| entry.into_endpoint(service_name))
            .ok_or_else(|| PipelineError::not_found(format!("Service '{}'", service_name)))?;

        debug!(
            service = service_name,
            address = %endpoint.address,
            port = endpoint.port,
            "Service resolved"
        );

        Ok(endpoint)
    }
}
