use async_trait::async_trait;
use tracing::info;

use crate::{
    clients::caller::{ResolvingCaller, ServiceRequest},
    error::{PipelineError, Result},
    models::{message::NotificationType, status::StatusUpdate},
};

pub const INTERNAL_SECRET_HEADER: &str = "x-internal-secret";

/// Reports a job's delivery outcome back to the gateway.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    async fn report(&self, channel: NotificationType, update: StatusUpdate) -> Result<()>;
}

pub struct GatewayStatusClient {
    caller: ResolvingCaller,
    service_name: String,
    internal_secret: String,
}

impl GatewayStatusClient {
    pub fn new(
        caller: ResolvingCaller,
        service_name: impl Into<String>,
        internal_secret: impl Into<String>,
    ) -> Self {
        Self {
            caller,
            service_name: service_name.into(),
            internal_secret: internal_secret.into(),
        }
    }
}

#[async_trait]
impl StatusReporter for GatewayStatusClient {
    async fn report(&self, channel: NotificationType, update: StatusUpdate) -> Result<()> {
        let body = serde_json::to_value(&update)
            .map_err(|e| PipelineError::Internal(format!("Failed to encode status update: {}", e)))?;

        let request = ServiceRequest::post(format!("/api/v1/notifications/{}/status", channel), body)
            .with_header(INTERNAL_SECRET_HEADER, &self.internal_secret)?;

        self.caller.call(&self.service_name, request).await?;

        info!(
            request_id = %update.request_id,
            status = %update.status,
            "Notification status updated"
        );
        Ok(())
    }
}
