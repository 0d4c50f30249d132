use async_trait::async_trait;

use crate::error::Result;

pub mod caller;
pub mod circuit_breaker;
pub mod fcm;
pub mod health;
pub mod mailer;
pub mod rbmq;
pub mod redis;
pub mod registry;
pub mod status;
pub mod template;
pub mod users;

/// A channel's delivery function: one rendered unit out to the provider.
#[async_trait]
pub trait Deliverer<P: Sync>: Send + Sync {
    async fn deliver(&self, payload: &P) -> Result<()>;
}
