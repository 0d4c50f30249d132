use std::time::Duration;

use anyhow::{Error, Result, anyhow};
use dotenvy::dotenv;
use serde::Deserialize;

use crate::models::{circuit_breaker::CircuitBreakerConfig, retry::RetryConfig};

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AppEnvironment {
    Development,
    Production,
}

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceRole {
    Gateway,
    Email,
    Push,
}

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_app_env")]
    pub app_env: AppEnvironment,
    pub service_role: ServiceRole,
    pub server_port: u16,

    pub rabbitmq_url: String,
    #[serde(default = "default_exchange")]
    pub notification_exchange: String,
    #[serde(default = "default_prefetch_count")]
    pub prefetch_count: u16,
    #[serde(default = "default_queue_max_retries")]
    pub queue_max_retries: u32,
    #[serde(default = "default_queue_retry_delay_ms")]
    pub queue_retry_delay_ms: u64,
    #[serde(default = "default_queue_backoff_multiplier")]
    pub queue_retry_backoff_multiplier: u32,

    pub redis_url: String,
    #[serde(default = "default_idempotency_ttl")]
    pub idempotency_ttl_seconds: u64,

    pub discovery_url: String,
    pub internal_service_secret: String,
    #[serde(default = "default_user_cache_ttl_ms")]
    pub user_cache_ttl_ms: u64,

    #[serde(default = "default_gateway_service_name")]
    pub gateway_service_name: String,
    #[serde(default = "default_template_service_name")]
    pub template_service_name: String,
    #[serde(default = "default_user_service_name")]
    pub user_service_name: String,

    pub fcm_project_id: Option<String>,

    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,
    pub smtp_from: Option<String>,

    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
    #[serde(default = "default_retry_backoff_multiplier")]
    pub retry_backoff_multiplier: u64,

    #[serde(default = "default_shutdown_step_timeout_secs")]
    pub shutdown_step_timeout_secs: u64,
}

fn default_app_env() -> AppEnvironment {
    AppEnvironment::Production
}

fn default_exchange() -> String {
    "notification.delivery".to_string()
}

fn default_prefetch_count() -> u16 {
    10
}

fn default_queue_max_retries() -> u32 {
    3
}

fn default_queue_retry_delay_ms() -> u64 {
    20_000
}

fn default_queue_backoff_multiplier() -> u32 {
    1
}

fn default_idempotency_ttl() -> u64 {
    24 * 60 * 60
}

fn default_user_cache_ttl_ms() -> u64 {
    3_000
}

fn default_gateway_service_name() -> String {
    "gateway-service".to_string()
}

fn default_template_service_name() -> String {
    "template-service".to_string()
}

fn default_user_service_name() -> String {
    "user-service".to_string()
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    100
}

fn default_max_retry_delay_ms() -> u64 {
    2_000
}

fn default_retry_backoff_multiplier() -> u64 {
    2
}

fn default_shutdown_step_timeout_secs() -> u64 {
    10
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        dotenv().ok();

        let config = envy::from_env::<Self>()
            .map_err(|e| anyhow!("Invalid or missing environmental variable: {}", e))?;
        Ok(config)
    }

    pub fn is_development(&self) -> bool {
        self.app_env == AppEnvironment::Development
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_retry_attempts,
            initial_delay_ms: self.initial_retry_delay_ms,
            max_delay_ms: self.max_retry_delay_ms,
            backoff_multiplier: self.retry_backoff_multiplier,
        }
    }

    /// Breaker profile follows the deployment environment, never the call site.
    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        match self.app_env {
            AppEnvironment::Development => CircuitBreakerConfig::lenient(),
            AppEnvironment::Production => CircuitBreakerConfig::strict(),
        }
    }

    pub fn shutdown_step_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_step_timeout_secs)
    }

    /// Time in-flight deliveries get to finish once intake stops; kept inside
    /// the shutdown step that waits for them.
    pub fn consumer_grace_period(&self) -> Duration {
        self.shutdown_step_timeout().mul_f64(0.8)
    }

    /// Services whose outage should not be retried through the wait queue.
    pub fn delivery_dependencies(&self) -> Vec<String> {
        vec![
            self.gateway_service_name.clone(),
            self.template_service_name.clone(),
        ]
    }
}
