use std::collections::HashMap;

use serde::Serialize;

/// One rendered email, ready for the SMTP transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub html: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PushPriority {
    Normal,
    High,
}

impl PushPriority {
    /// Jobs above priority 5 are delivered as high priority.
    pub fn from_job_priority(priority: u8) -> Self {
        if priority > 5 {
            PushPriority::High
        } else {
            PushPriority::Normal
        }
    }
}

/// One rendered push notification addressed to a single device token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushMessage {
    pub token: String,
    pub title: String,
    pub body: String,
    pub image: Option<String>,
    pub link: Option<String>,
    pub data: HashMap<String, String>,
    pub priority: PushPriority,
    pub ttl_seconds: u64,
}
