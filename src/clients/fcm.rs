use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use gcp_auth::TokenProvider;
use reqwest::Client;
use tracing::{debug, info};

use crate::{
    clients::{Deliverer, circuit_breaker::CircuitBreaker},
    error::{PipelineError, Result},
    models::{delivery::PushMessage, fcm::FcmRequest},
};

pub const FCM_SERVICE: &str = "fcm";

const FCM_SCOPES: &[&str] = &["https://www.googleapis.com/auth/firebase.messaging"];

/// Push delivery through the FCM HTTP v1 API.
pub struct FcmClient {
    http_client: Client,
    project_id: String,
    token_provider: Arc<dyn TokenProvider>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl FcmClient {
    pub async fn new(project_id: &str, circuit_breaker: Arc<CircuitBreaker>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PipelineError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        let token_provider = gcp_auth::provider()
            .await
            .map_err(|e| PipelineError::Internal(format!("No Google credentials available: {}", e)))?;

        info!(project_id, "FCM client initialized");

        Ok(Self {
            http_client,
            project_id: project_id.to_string(),
            token_provider,
            circuit_breaker,
        })
    }

    async fn send_once(&self, request: &FcmRequest) -> Result<()> {
        let token = self
            .token_provider
            .token(FCM_SCOPES)
            .await
            .map_err(|e| PipelineError::unavailable(FCM_SERVICE, format!("token exchange failed: {}", e)))?;

        let url = format!(
            "https://fcm.googleapis.com/v1/projects/{}/messages:send",
            self.project_id
        );

        let response = self
            .http_client
            .post(&url)
            .bearer_auth(token.as_str())
            .json(request)
            .send()
            .await
            .map_err(|e| PipelineError::unavailable(FCM_SERVICE, e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.json().await.unwrap_or(serde_json::Value::Null);
        Err(PipelineError::Downstream {
            service: FCM_SERVICE.to_string(),
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl Deliverer<PushMessage> for FcmClient {
    async fn deliver(&self, message: &PushMessage) -> Result<()> {
        debug!(priority = ?message.priority, "Sending FCM push notification");

        let request = FcmRequest::from(message);
        self.circuit_breaker.call(|| self.send_once(&request)).await?;

        debug!("FCM push notification sent");
        Ok(())
    }
}
