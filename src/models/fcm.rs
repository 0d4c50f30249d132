//! FCM HTTP v1 request body.

use std::collections::HashMap;

use serde::Serialize;

use crate::models::delivery::{PushMessage, PushPriority};

#[derive(Debug, Clone, Serialize)]
pub struct FcmRequest {
    pub message: FcmMessage,
}

#[derive(Debug, Clone, Serialize)]
pub struct FcmMessage {
    pub token: String,
    pub notification: FcmNotification,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,

    pub android: AndroidConfig,
    pub apns: ApnsConfig,
    pub webpush: WebpushConfig,
}

#[derive(Debug, Clone, Serialize)]
pub struct FcmNotification {
    pub title: String,
    pub body: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AndroidConfig {
    pub priority: PushPriority,
    /// Duration string, e.g. `"86400s"`.
    pub ttl: String,
    pub notification: AndroidNotification,
}

#[derive(Debug, Clone, Serialize)]
pub struct AndroidNotification {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub click_action: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApnsConfig {
    pub payload: serde_json::Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcm_options: Option<ApnsFcmOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApnsFcmOptions {
    pub image: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebpushConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fcm_options: Option<WebpushFcmOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WebpushFcmOptions {
    pub link: String,
}

impl From<&PushMessage> for FcmRequest {
    fn from(push: &PushMessage) -> Self {
        let aps = serde_json::json!({
            "aps": {
                "sound": "default",
                "badge": 1,
                "mutable-content": 1,
                "content-available": 1,
            }
        });

        FcmRequest {
            message: FcmMessage {
                token: push.token.clone(),
                notification: FcmNotification {
                    title: push.title.clone(),
                    body: push.body.clone(),
                    image: push.image.clone(),
                },
                data: push.data.clone(),
                android: AndroidConfig {
                    priority: push.priority,
                    ttl: format!("{}s", push.ttl_seconds),
                    notification: AndroidNotification {
                        image: push.image.clone(),
                        click_action: push.link.clone(),
                    },
                },
                apns: ApnsConfig {
                    payload: aps,
                    fcm_options: push.image.clone().map(|image| ApnsFcmOptions { image }),
                },
                webpush: WebpushConfig {
                    fcm_options: push.link.clone().map(|link| WebpushFcmOptions { link }),
                },
            },
        }
    }
}
