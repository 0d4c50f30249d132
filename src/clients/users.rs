use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use tracing::debug;

use crate::{
    clients::caller::{ResolvingCaller, ServiceRequest, response_data},
    error::{PipelineError, Result},
    models::user::User,
};

#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn get_user(&self, user_id: &str) -> Result<User>;

    /// Drops any cached copy after the user was changed elsewhere.
    async fn invalidate(&self, user_id: &str);
}

/// User lookups through the user service, cached briefly to absorb bursts of
/// requests for the same user.
#[derive(Clone)]
pub struct UserServiceClient {
    caller: ResolvingCaller,
    service_name: String,
    cache: Cache<String, User>,
}

impl UserServiceClient {
    pub fn new(caller: ResolvingCaller, service_name: impl Into<String>, cache_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(10_000)
            .time_to_live(cache_ttl)
            .build();

        Self {
            caller,
            service_name: service_name.into(),
            cache,
        }
    }
}

#[async_trait]
impl UserDirectory for UserServiceClient {
    async fn get_user(&self, user_id: &str) -> Result<User> {
        if let Some(user) = self.cache.get(user_id).await {
            debug!(user_id, "User served from cache");
            return Ok(user);
        }

        let request = ServiceRequest::get("/api/v1/users").with_header("x-user-id", user_id)?;
        let body = self.caller.call(&self.service_name, request).await?;

        let user: User = serde_json::from_value(response_data(body)).map_err(|e| {
            PipelineError::Internal(format!("Unexpected user payload from {}: {}", self.service_name, e))
        })?;

        self.cache.insert(user_id.to_string(), user.clone()).await;
        Ok(user)
    }

    async fn invalidate(&self, user_id: &str) {
        self.cache.invalidate(user_id).await;
    }
}
