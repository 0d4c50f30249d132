use serde::{Deserialize, Serialize};

use crate::models::message::NotificationType;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
    #[serde(default)]
    pub email_notification_enabled: bool,

    #[serde(default)]
    pub push_notification_enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub push_tokens: Vec<String>,

    #[serde(default)]
    pub preferences: Option<UserPreferences>,
}

impl User {
    /// Users without stored preferences receive nothing.
    pub fn accepts(&self, notification_type: NotificationType) -> bool {
        match (&self.preferences, notification_type) {
            (Some(prefs), NotificationType::Email) => prefs.email_notification_enabled,
            (Some(prefs), NotificationType::Push) => prefs.push_notification_enabled,
            (None, _) => false,
        }
    }
}
