use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, header::ContentType},
    transport::smtp::authentication::Credentials,
};
use tracing::{debug, info};

use crate::{
    clients::Deliverer,
    config::Config,
    error::{PipelineError, Result},
    models::delivery::EmailMessage,
};

/// Email delivery over SMTP.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn from_config(config: &Config) -> Result<Self> {
        let host = config
            .smtp_host
            .as_deref()
            .ok_or_else(|| PipelineError::Internal("SMTP_HOST is not set".to_string()))?;
        let from = config
            .smtp_from
            .clone()
            .ok_or_else(|| PipelineError::Internal("SMTP_FROM is not set".to_string()))?;

        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(host)
            .map_err(|e| PipelineError::Internal(format!("Failed to create SMTP relay: {}", e)))?;

        if let Some(port) = config.smtp_port {
            builder = builder.port(port);
        }

        if let (Some(username), Some(password)) = (&config.smtp_username, &config.smtp_password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        info!(host, "SMTP transport initialized");

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }

    pub fn sender(&self) -> &str {
        &self.from
    }

    fn build_message(email: &EmailMessage) -> Result<Message> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|e| PipelineError::Internal(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = email
            .to
            .parse()
            .map_err(|e| PipelineError::malformed(format!("Invalid recipient address: {}", e)))?;

        Message::builder()
            .from(from)
            .to(to)
            .subject(&email.subject)
            .header(ContentType::TEXT_HTML)
            .body(email.html.clone())
            .map_err(|e| PipelineError::Delivery(format!("Failed to build email: {}", e)))
    }
}

#[async_trait]
impl Deliverer<EmailMessage> for SmtpMailer {
    async fn deliver(&self, email: &EmailMessage) -> Result<()> {
        let message = Self::build_message(email)?;

        self.transport
            .send(message)
            .await
            .map_err(|e| PipelineError::Delivery(format!("SMTP send failed: {}", e)))?;

        debug!(subject = %email.subject, "Email handed to SMTP relay");
        Ok(())
    }
}
