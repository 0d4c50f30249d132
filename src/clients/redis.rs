use async_trait::async_trait;
use redis::{AsyncCommands, Client, aio::MultiplexedConnection};
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{PipelineError, Result},
    models::{retry::RetryConfig, status::NotificationRecord},
    utils::retry_with_backoff,
};

/// Idempotency and status records keyed by request id.
#[async_trait]
pub trait StatusStore: Send + Sync {
    async fn get(&self, request_id: &str) -> Result<Option<NotificationRecord>>;

    /// Writes `record` only when no record exists for its request id.
    /// Returns `None` when written, or the record that was already there.
    async fn create(&self, record: &NotificationRecord) -> Result<Option<NotificationRecord>>;

    /// Overwrites the record and restarts its TTL.
    async fn put(&self, record: &NotificationRecord) -> Result<()>;

    async fn ping(&self) -> Result<()>;
}

pub fn record_key(request_id: &str) -> String {
    format!("notification:{}", request_id)
}

#[derive(Clone)]
pub struct RedisStatusStore {
    connection: MultiplexedConnection,
    ttl_seconds: u64,
    retry_config: RetryConfig,
}

impl RedisStatusStore {
    pub async fn connect(config: &Config) -> Result<Self> {
        debug!("Connecting to Redis");

        let client = Client::open(config.redis_url.as_str())
            .map_err(|e| PipelineError::Store(format!("Failed to create redis client: {}", e)))?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PipelineError::Store(format!("Failed to connect to redis: {}", e)))?;

        info!("Redis connection established");

        Ok(Self {
            connection,
            ttl_seconds: config.idempotency_ttl_seconds,
            retry_config: config.retry_config(),
        })
    }

    fn decode(key: &str, raw: Option<String>) -> Option<NotificationRecord> {
        let raw = raw?;
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key, error = %e, "Unreadable status record, treating as absent");
                None
            }
        }
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn get(&self, request_id: &str) -> Result<Option<NotificationRecord>> {
        let key = record_key(request_id);
        let mut conn = self.connection.clone();

        let raw: Option<String> = conn.get(&key).await?;
        Ok(Self::decode(&key, raw))
    }

    async fn create(&self, record: &NotificationRecord) -> Result<Option<NotificationRecord>> {
        let key = record_key(&record.request_id);
        let value = serde_json::to_string(record)
            .map_err(|e| PipelineError::Internal(format!("Failed to encode record: {}", e)))?;
        let mut conn = self.connection.clone();

        let written: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&value)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_seconds)
            .query_async(&mut conn)
            .await?;

        if written.is_some() {
            debug!(request_id = %record.request_id, "Status record created");
            return Ok(None);
        }

        let raw: Option<String> = conn.get(&key).await?;
        match Self::decode(&key, raw) {
            Some(existing) => Ok(Some(existing)),
            None => Err(PipelineError::Store(format!(
                "Record for '{}' disappeared after a conflicting write",
                record.request_id
            ))),
        }
    }

    async fn put(&self, record: &NotificationRecord) -> Result<()> {
        let key = record_key(&record.request_id);
        let value = serde_json::to_string(record)
            .map_err(|e| PipelineError::Internal(format!("Failed to encode record: {}", e)))?;
        let ttl = self.ttl_seconds;

        retry_with_backoff(&self.retry_config, || {
            let mut conn = self.connection.clone();
            let key = key.clone();
            let value = value.clone();

            async move { conn.set_ex::<_, _, ()>(&key, &value, ttl).await }
        })
        .await?;

        debug!(request_id = %record.request_id, status = %record.status, "Status record stored");
        Ok(())
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
