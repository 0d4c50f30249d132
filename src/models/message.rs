use std::{collections::HashMap, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Delivery channel. Doubles as the broker routing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Email,
    Push,
}

impl NotificationType {
    pub fn routing_key(&self) -> &'static str {
        match self {
            NotificationType::Email => "email",
            NotificationType::Push => "push",
        }
    }
}

impl Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.routing_key())
    }
}

impl FromStr for NotificationType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(NotificationType::Email),
            "push" => Ok(NotificationType::Push),
            other => Err(PipelineError::validation(format!(
                "Unknown notification type '{}'",
                other
            ))),
        }
    }
}

/// Job body published by the gateway and consumed by a channel worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationJob {
    pub notification_type: NotificationType,
    pub request_id: String,

    #[serde(default)]
    pub user_id: Option<String>,

    pub template_code: String,

    #[serde(default)]
    pub variables: HashMap<String, serde_json::Value>,

    #[serde(default)]
    pub priority: u8,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default)]
    pub push_tokens: Vec<String>,
}
