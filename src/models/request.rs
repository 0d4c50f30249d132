use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{
    error::PipelineError,
    models::{message::NotificationType, status::NotificationRecord},
};

pub const MAX_PRIORITY: u8 = 10;

/// A client's request to send one notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub request_id: String,
    pub notification_type: NotificationType,
    pub user_id: String,
    pub template_code: String,

    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub priority: u8,
}

impl NotificationRequest {
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.request_id.trim().is_empty() {
            return Err(PipelineError::validation("request_id is required."));
        }
        if self.user_id.trim().is_empty() {
            return Err(PipelineError::validation("user_id is required."));
        }
        if self.template_code.trim().is_empty() {
            return Err(PipelineError::validation("template_code is required."));
        }
        if self.priority > MAX_PRIORITY {
            return Err(PipelineError::validation(format!(
                "priority must be between 0 and {}.",
                MAX_PRIORITY
            )));
        }
        Ok(())
    }
}

/// Non-error results of handling a notification request.
#[derive(Debug, Clone, PartialEq)]
pub enum HandleOutcome {
    Queued(NotificationRecord),
    DisabledByUser,
    AlreadyProcessed(NotificationRecord),
    PreviouslyFailed(NotificationRecord),
}

impl HandleOutcome {
    pub fn message(&self, notification_type: NotificationType) -> String {
        match self {
            HandleOutcome::Queued(_) => {
                format!("{} notification queued successfully.", notification_type)
            }
            HandleOutcome::DisabledByUser => {
                format!("{} notifications disabled by user.", notification_type)
            }
            HandleOutcome::AlreadyProcessed(_) => "Notification already processed.".to_string(),
            HandleOutcome::PreviouslyFailed(_) => "Notification previously failed.".to_string(),
        }
    }
}
