use std::fmt::{Display, Formatter, Result};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::message::NotificationType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Delivered,
    Failed,
}

impl Display for NotificationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Delivered => write!(f, "delivered"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Idempotency/status record stored under `notification:{request_id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub request_id: String,
    pub status: NotificationStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification_type: Option<NotificationType>,

    #[serde(default)]
    pub priority: u8,

    #[serde(default)]
    pub error: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl NotificationRecord {
    pub fn pending(request_id: &str, notification_type: NotificationType, priority: u8) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: NotificationStatus::Pending,
            notification_type: Some(notification_type),
            priority,
            error: None,
            timestamp: Utc::now(),
        }
    }

    /// Folds a worker's status report into this record.
    pub fn apply(mut self, update: &StatusUpdate) -> Self {
        self.status = update.status;
        self.error = update.error.clone();
        self.timestamp = update.timestamp.unwrap_or_else(Utc::now);
        self
    }
}

/// Body of the internal status callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub request_id: String,
    pub status: NotificationStatus,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusUpdate {
    pub fn delivered(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: NotificationStatus::Delivered,
            timestamp: Some(Utc::now()),
            error: None,
        }
    }

    pub fn failed(request_id: &str, error: String) -> Self {
        Self {
            request_id: request_id.to_string(),
            status: NotificationStatus::Failed,
            timestamp: Some(Utc::now()),
            error: Some(error),
        }
    }
}
