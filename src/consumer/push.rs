use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use futures_util::future::join_all;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::{
    clients::{
        Deliverer,
        template::{TemplateSource, render_template},
    },
    consumer::ChannelHandler,
    error::{PipelineError, Result},
    models::{
        delivery::{PushMessage, PushPriority},
        message::{NotificationJob, NotificationType},
        template::Template,
    },
};

pub const PUSH_TTL_SECONDS: u64 = 86_400;

/// Shape check for a device token before it is handed to the provider.
pub fn validate_push_token(token: &str) -> Result<()> {
    if token.is_empty() {
        return Err(PipelineError::validation("Device token cannot be empty"));
    }

    if token.len() < 20 {
        return Err(PipelineError::validation("Device token too short (minimum 20 characters)"));
    }

    if token.len() > 200 {
        return Err(PipelineError::validation("Device token too long (maximum 200 characters)"));
    }

    let valid_chars = token
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ':' | '.'));

    if !valid_chars {
        return Err(PipelineError::validation("Device token contains invalid characters"));
    }

    Ok(())
}

pub struct PushHandler {
    templates: Arc<dyn TemplateSource>,
    sender: Arc<dyn Deliverer<PushMessage>>,
}

impl PushHandler {
    pub fn new(templates: Arc<dyn TemplateSource>, sender: Arc<dyn Deliverer<PushMessage>>) -> Self {
        Self { templates, sender }
    }

    fn data_payload(template: &Template, job: &NotificationJob) -> HashMap<String, String> {
        let mut data: HashMap<String, String> = template
            .metadata
            .iter()
            .flatten()
            .map(|(key, value)| {
                let value = match value {
                    JsonValue::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (key.clone(), value)
            })
            .collect();

        if let Some(user_id) = &job.user_id {
            data.insert("user_id".to_string(), user_id.clone());
        }
        data.insert("template_code".to_string(), job.template_code.clone());
        data
    }
}

#[async_trait]
impl ChannelHandler for PushHandler {
    fn channel(&self) -> NotificationType {
        NotificationType::Push
    }

    fn validate(&self, job: &NotificationJob) -> Result<()> {
        if job.push_tokens.is_empty() {
            return Err(PipelineError::malformed("No push tokens"));
        }
        if job.template_code.trim().is_empty() {
            return Err(PipelineError::malformed("Missing template_code"));
        }
        Ok(())
    }

    /// Fans out over every valid token concurrently. Succeeds when at least
    /// one token was delivered.
    async fn deliver(&self, job: &NotificationJob) -> Result<()> {
        let tokens: Vec<&String> = job
            .push_tokens
            .iter()
            .filter(|token| match validate_push_token(token) {
                Ok(()) => true,
                Err(e) => {
                    warn!(request_id = %job.request_id, error = %e, "Skipping invalid device token");
                    false
                }
            })
            .collect();

        if tokens.is_empty() {
            return Err(PipelineError::malformed("No valid push tokens"));
        }

        let template = self.templates.fetch_template(&job.template_code).await?;
        let rendered = render_template(&template, &job.variables)?;
        let data = Self::data_payload(&template, job);
        let priority = PushPriority::from_job_priority(job.priority);

        let sends = tokens.iter().map(|token| {
            let message = PushMessage {
                token: token.to_string(),
                title: rendered.subject.clone(),
                body: rendered.body.clone(),
                image: template.image_url.clone(),
                link: rendered.action_url.clone().filter(|link| !link.is_empty()),
                data: data.clone(),
                priority,
                ttl_seconds: PUSH_TTL_SECONDS,
            };

            async move { self.sender.deliver(&message).await }
        });

        let results = join_all(sends).await;

        let mut delivered = 0;
        let mut last_error = None;
        for result in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(request_id = %job.request_id, error = %e, "Failed to send to device token");
                    last_error = Some(e);
                }
            }
        }

        let failed = tokens.len() - delivered;
        info!(
            request_id = %job.request_id,
            delivered,
            failed,
            skipped = job.push_tokens.len() - tokens.len(),
            "Push batch processed"
        );

        match last_error {
            Some(e) if delivered == 0 => Err(PipelineError::Delivery(format!(
                "all {} device tokens failed, last error: {}",
                tokens.len(),
                e
            ))),
            _ => Ok(()),
        }
    }
}
