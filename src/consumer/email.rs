use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::{
    clients::{
        Deliverer,
        template::{TemplateSource, render_template},
    },
    consumer::ChannelHandler,
    error::{PipelineError, Result},
    models::{
        delivery::EmailMessage,
        message::{NotificationJob, NotificationType},
    },
};

pub struct EmailHandler {
    templates: Arc<dyn TemplateSource>,
    mailer: Arc<dyn Deliverer<EmailMessage>>,
    from: String,
}

impl EmailHandler {
    pub fn new(
        templates: Arc<dyn TemplateSource>,
        mailer: Arc<dyn Deliverer<EmailMessage>>,
        from: impl Into<String>,
    ) -> Self {
        Self {
            templates,
            mailer,
            from: from.into(),
        }
    }
}

#[async_trait]
impl ChannelHandler for EmailHandler {
    fn channel(&self) -> NotificationType {
        NotificationType::Email
    }

    fn validate(&self, job: &NotificationJob) -> Result<()> {
        if job.email.as_deref().is_none_or(|email| email.trim().is_empty()) {
            return Err(PipelineError::malformed("Missing email"));
        }
        if job.template_code.trim().is_empty() {
            return Err(PipelineError::malformed("Missing template_code"));
        }
        Ok(())
    }

    async fn deliver(&self, job: &NotificationJob) -> Result<()> {
        let to = job
            .email
            .clone()
            .ok_or_else(|| PipelineError::malformed("Missing email"))?;

        let template = self.templates.fetch_template(&job.template_code).await?;
        let rendered = render_template(&template, &job.variables)?;

        debug!(request_id = %job.request_id, template_code = %job.template_code, "Sending email");

        let message = EmailMessage {
            to,
            from: self.from.clone(),
            subject: rendered.subject,
            html: rendered.body,
        };

        self.mailer.deliver(&message).await
    }
}
