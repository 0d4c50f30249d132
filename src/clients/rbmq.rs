use async_trait::async_trait;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, Consumer, ExchangeKind,
    acker::Acker,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    config::Config,
    error::{PipelineError, Result},
    models::{message::NotificationType, request::MAX_PRIORITY, retry::RetryConfig},
    utils::retry_with_backoff,
};

pub const RETRY_COUNT_HEADER: &str = "x-retry-count";

/// Names and arguments of one channel's exchange/queue/wait/failed triad.
///
/// With a backoff multiplier of 1 there is a single `{channel}.wait` queue.
/// Above 1 each retry hop gets its own `{channel}.wait.{n}` queue whose TTL is
/// `retry_delay_ms * multiplier^(n-1)`, so every message in a queue shares one
/// delay and none waits behind a longer one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub exchange: String,
    pub routing_key: String,
    pub retry_delay_ms: u64,
    pub backoff_multiplier: u32,
    pub max_retries: u32,
}

impl Topology {
    pub fn new(exchange: &str, channel: NotificationType, retry_delay_ms: u64) -> Self {
        Self {
            exchange: exchange.to_string(),
            routing_key: channel.routing_key().to_string(),
            retry_delay_ms,
            backoff_multiplier: 1,
            max_retries: 1,
        }
    }

    pub fn with_backoff(mut self, multiplier: u32, max_retries: u32) -> Self {
        self.backoff_multiplier = multiplier.max(1);
        self.max_retries = max_retries.max(1);
        self
    }

    fn per_hop(&self) -> bool {
        self.backoff_multiplier > 1
    }

    pub fn main_queue(&self) -> String {
        format!("{}.queue", self.routing_key)
    }

    /// Queue holding a message before its `attempt`-th redelivery (1-based).
    /// Its name doubles as the routing key.
    pub fn wait_queue(&self, attempt: u32) -> String {
        if self.per_hop() {
            format!("{}.wait.{}", self.routing_key, attempt.clamp(1, self.max_retries))
        } else {
            format!("{}.wait", self.routing_key)
        }
    }

    pub fn wait_routing_key(&self, attempt: u32) -> String {
        self.wait_queue(attempt)
    }

    /// Every wait queue with the hop it serves.
    pub fn wait_queues(&self) -> Vec<(u32, String)> {
        let hops = if self.per_hop() { self.max_retries } else { 1 };
        (1..=hops).map(|hop| (hop, self.wait_queue(hop))).collect()
    }

    pub fn failed_queue(&self) -> String {
        format!("{}.failed", self.routing_key)
    }

    pub fn failed_routing_key(&self) -> String {
        format!("{}.failed", self.routing_key)
    }

    /// Delay before the `attempt`-th redelivery.
    pub fn wait_delay_ms(&self, attempt: u32) -> u64 {
        if !self.per_hop() {
            return self.retry_delay_ms;
        }

        let hop = attempt.clamp(1, self.max_retries);
        let factor = u64::from(self.backoff_multiplier).saturating_pow(hop - 1);
        self.retry_delay_ms.saturating_mul(factor)
    }

    /// Rejected messages dead-letter into `.failed`.
    pub fn main_queue_arguments(&self) -> FieldTable {
        let mut args = FieldTable::default();
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.exchange.as_str().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.failed_routing_key().as_str().into()),
        );
        args.insert(
            "x-max-priority".into(),
            AMQPValue::ShortShortUInt(MAX_PRIORITY),
        );
        args
    }

    /// Expired messages dead-letter back onto the main routing key.
    pub fn wait_queue_arguments(&self, attempt: u32) -> FieldTable {
        let ttl = i64::try_from(self.wait_delay_ms(attempt)).unwrap_or(i64::MAX);

        let mut args = FieldTable::default();
        args.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl));
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(self.exchange.as_str().into()),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(self.routing_key.as_str().into()),
        );
        args
    }

    /// `(queue, routing key)` pairs bound to the exchange.
    pub fn bindings(&self) -> Vec<(String, String)> {
        let mut bindings = vec![(self.main_queue(), self.routing_key.clone())];
        bindings.extend(
            self.wait_queues()
                .into_iter()
                .map(|(_, queue)| (queue.clone(), queue)),
        );
        bindings.push((self.failed_queue(), self.failed_routing_key()));
        bindings
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub priority: Option<u8>,
    pub retry_count: Option<u32>,
}

impl PublishOptions {
    pub fn with_priority(priority: u8) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    pub fn retry(retry_count: u32) -> Self {
        Self {
            priority: None,
            retry_count: Some(retry_count),
        }
    }

    pub fn properties(&self) -> BasicProperties {
        let mut properties = BasicProperties::default()
            .with_delivery_mode(2)
            .with_content_type("application/json".into());

        if let Some(priority) = self.priority {
            properties = properties.with_priority(priority.min(MAX_PRIORITY));
        }

        if let Some(retry_count) = self.retry_count {
            let mut headers = FieldTable::default();
            headers.insert(
                RETRY_COUNT_HEADER.into(),
                AMQPValue::LongLongInt(i64::from(retry_count)),
            );
            properties = properties.with_headers(headers);
        }

        properties
    }
}

/// Reads `x-retry-count`, defaulting to zero when absent or not an integer.
pub fn retry_count_from(properties: &BasicProperties) -> u32 {
    let Some(headers) = properties.headers() else {
        return 0;
    };

    let value = headers
        .inner()
        .iter()
        .find(|(key, _)| key.as_str() == RETRY_COUNT_HEADER)
        .map(|(_, value)| value);

    let count = match value {
        Some(AMQPValue::ShortShortInt(v)) => i64::from(*v),
        Some(AMQPValue::ShortShortUInt(v)) => i64::from(*v),
        Some(AMQPValue::ShortInt(v)) => i64::from(*v),
        Some(AMQPValue::ShortUInt(v)) => i64::from(*v),
        Some(AMQPValue::LongInt(v)) => i64::from(*v),
        Some(AMQPValue::LongUInt(v)) => i64::from(*v),
        Some(AMQPValue::LongLongInt(v)) => *v,
        Some(AMQPValue::Float(v)) => *v as i64,
        Some(AMQPValue::Double(v)) => *v as i64,
        _ => 0,
    };

    u32::try_from(count).unwrap_or(0)
}

/// Sends a persistent message to the notification exchange.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish(&self, routing_key: &str, payload: &[u8], options: PublishOptions)
    -> Result<()>;
}

/// Settles one delivery.
#[async_trait]
pub trait Acknowledger: Send + Sync {
    async fn ack(&self) -> Result<()>;

    /// Negative acknowledgement without requeue; the queue dead-letters it.
    async fn reject(&self) -> Result<()>;

    /// Negative acknowledgement that puts the message back on its queue.
    async fn requeue(&self) -> Result<()>;
}

/// Acks through the delivery's own acker so a reconnect cannot misroute the tag.
pub struct DeliveryAcker(pub Acker);

#[async_trait]
impl Acknowledger for DeliveryAcker {
    async fn ack(&self) -> Result<()> {
        self.0
            .ack(BasicAckOptions::default())
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Broker(format!("Failed to acknowledge message: {}", e)))
    }

    async fn reject(&self) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue: false,
            })
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Broker(format!("Failed to reject message: {}", e)))
    }

    async fn requeue(&self) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                multiple: false,
                requeue: true,
            })
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Broker(format!("Failed to requeue message: {}", e)))
    }
}

struct Connected {
    connection: Connection,
    channel: Channel,
}

/// Owns the process's single broker connection and channel.
///
/// A closed connection or channel is dropped and reopened on next use.
pub struct RabbitMqClient {
    url: String,
    exchange: String,
    retry_config: RetryConfig,
    connected: Mutex<Option<Connected>>,
}

impl RabbitMqClient {
    pub fn new(config: &Config) -> Self {
        Self {
            url: config.rabbitmq_url.clone(),
            exchange: config.notification_exchange.clone(),
            retry_config: config.retry_config(),
            connected: Mutex::new(None),
        }
    }

    pub async fn connect(config: &Config) -> Result<Self> {
        let client = Self::new(config);
        client.declare_exchange().await?;
        Ok(client)
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub async fn channel(&self) -> Result<Channel> {
        let mut connected = self.connected.lock().await;

        if let Some(current) = connected.as_ref() {
            if current.connection.status().connected() && current.channel.status().connected() {
                return Ok(current.channel.clone());
            }
            warn!("RabbitMQ channel lost, reconnecting");
        }

        *connected = None;

        let fresh = retry_with_backoff(&self.retry_config, || Self::open(&self.url)).await?;
        let channel = fresh.channel.clone();
        *connected = Some(fresh);

        Ok(channel)
    }

    async fn open(url: &str) -> Result<Connected> {
        debug!("Connecting to RabbitMQ");

        let connection = Connection::connect(url, ConnectionProperties::default())
            .await
            .map_err(|e| PipelineError::Broker(format!("Failed to connect to RabbitMQ: {}", e)))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| PipelineError::Broker(format!("RabbitMQ channel creation failed: {}", e)))?;

        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| PipelineError::Broker(format!("Failed to enable publisher confirms: {}", e)))?;

        info!("RabbitMQ connection established");

        Ok(Connected {
            connection,
            channel,
        })
    }

    pub async fn declare_exchange(&self) -> Result<Channel> {
        let channel = self.channel().await?;

        channel
            .exchange_declare(
                &self.exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::Broker(format!("Failed to declare exchange: {}", e)))?;

        Ok(channel)
    }

    /// Declares the exchange, the queue triad and their bindings. Re-declaring
    /// identical entities is a no-op on the broker.
    pub async fn ensure_topology(&self, topology: &Topology) -> Result<Channel> {
        let channel = self.declare_exchange().await?;

        let durable = QueueDeclareOptions {
            durable: true,
            ..Default::default()
        };

        channel
            .queue_declare(&topology.main_queue(), durable, topology.main_queue_arguments())
            .await
            .map_err(|e| PipelineError::Broker(format!("Failed to declare main queue: {}", e)))?;

        for (hop, queue) in topology.wait_queues() {
            channel
                .queue_declare(&queue, durable, topology.wait_queue_arguments(hop))
                .await
                .map_err(|e| PipelineError::Broker(format!("Failed to declare {}: {}", queue, e)))?;
        }

        channel
            .queue_declare(&topology.failed_queue(), durable, FieldTable::default())
            .await
            .map_err(|e| PipelineError::Broker(format!("Failed to declare failed queue: {}", e)))?;

        for (queue, routing_key) in topology.bindings() {
            channel
                .queue_bind(
                    &queue,
                    &topology.exchange,
                    &routing_key,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await
                .map_err(|e| PipelineError::Broker(format!("Failed to bind {}: {}", queue, e)))?;
        }

        info!(
            exchange = %topology.exchange,
            queue = %topology.main_queue(),
            retry_delay_ms = topology.retry_delay_ms,
            wait_queues = topology.wait_queues().len(),
            "Broker topology ready"
        );

        Ok(channel)
    }

    /// Starts consuming the main queue with at most `prefetch` unacknowledged
    /// deliveries in flight.
    pub async fn consume(
        &self,
        topology: &Topology,
        consumer_tag: &str,
        prefetch: u16,
    ) -> Result<Consumer> {
        let channel = self.ensure_topology(topology).await?;

        channel
            .basic_qos(prefetch, BasicQosOptions::default())
            .await
            .map_err(|e| PipelineError::Broker(format!("Failed to set up QoS: {}", e)))?;

        let consumer = channel
            .basic_consume(
                &topology.main_queue(),
                consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| PipelineError::Broker(format!("Failed to create consumer: {}", e)))?;

        info!(queue = %topology.main_queue(), prefetch, "Waiting for messages");

        Ok(consumer)
    }

    pub async fn is_connected(&self) -> bool {
        self.connected
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.connection.status().connected())
    }

    pub async fn close(&self) -> Result<()> {
        let Some(current) = self.connected.lock().await.take() else {
            return Ok(());
        };

        if let Err(e) = current.channel.close(200, "shutdown").await {
            warn!(error = %e, "Error closing RabbitMQ channel");
        } else {
            info!("RabbitMQ channel closed");
        }

        current
            .connection
            .close(200, "shutdown")
            .await
            .map_err(|e| PipelineError::Broker(format!("Error closing RabbitMQ connection: {}", e)))?;

        info!("RabbitMQ connection closed");
        Ok(())
    }
}

#[async_trait]
impl MessagePublisher for RabbitMqClient {
    async fn publish(
        &self,
        routing_key: &str,
        payload: &[u8],
        options: PublishOptions,
    ) -> Result<()> {
        let channel = self.channel().await?;

        let confirmation = channel
            .basic_publish(
                &self.exchange,
                routing_key,
                BasicPublishOptions::default(),
                payload,
                options.properties(),
            )
            .await
            .map_err(|e| PipelineError::Broker(format!("Failed to publish message: {}", e)))?
            .await
            .map_err(|e| PipelineError::Broker(format!("Publish confirmation failed: {}", e)))?;

        if matches!(confirmation, Confirmation::Nack(_)) {
            return Err(PipelineError::Broker(format!(
                "Broker refused message for routing key '{}'",
                routing_key
            )));
        }

        debug!(exchange = %self.exchange, routing_key, "Message published");
        Ok(())
    }
}
