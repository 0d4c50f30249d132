//! Generic delivery worker shared by the email and push channels.
//!
//! Each delivery is parsed, validated and handed to a [`ChannelHandler`]; the
//! outcome decides whether the message is acknowledged, recycled through the
//! wait queue, or dead-lettered into `.failed`.

pub mod email;
pub mod push;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{Consumer, message::Delivery};
use tokio::{task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    clients::{
        rbmq::{
            Acknowledger, DeliveryAcker, MessagePublisher, PublishOptions, RabbitMqClient,
            Topology, retry_count_from,
        },
        status::StatusReporter,
    },
    error::{ErrorKind, PipelineError, Result},
    models::{
        message::{NotificationJob, NotificationType},
        status::StatusUpdate,
    },
};

/// Channel-specific half of the consumer.
#[async_trait]
pub trait ChannelHandler: Send + Sync + 'static {
    fn channel(&self) -> NotificationType;

    /// Required fields for this channel. A failure marks the job malformed.
    fn validate(&self, job: &NotificationJob) -> Result<()>;

    /// Renders and delivers every unit of the job.
    async fn deliver(&self, job: &NotificationJob) -> Result<()>;
}

/// How a failed job is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    /// Cannot become valid by waiting: report FAILED, then straight to `.failed`.
    Discard,
    /// Will fail the same way on every attempt: report FAILED, then `.failed`.
    Terminal,
    /// A service the worker depends on is down; its breaker does the backing off.
    DependencyDown,
    /// Recycle through the wait queue until retries run out.
    Retry,
}

/// Maps an error onto its settlement. `dependencies` are the logical names of
/// the services whose outage should not be retried through the wait queue.
pub fn classify(err: &PipelineError, dependencies: &[String]) -> FailureAction {
    match err.kind() {
        ErrorKind::MalformedMessage | ErrorKind::ValidationError => FailureAction::Discard,
        ErrorKind::NotFound => FailureAction::Terminal,
        ErrorKind::ServiceUnavailable | ErrorKind::CircuitOpen
            if err
                .service()
                .is_some_and(|service| dependencies.iter().any(|d| d == service)) =>
        {
            FailureAction::DependencyDown
        }
        _ => FailureAction::Retry,
    }
}

/// What happened to one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Delivered,
    Discarded,
    DependencyDown,
    Retried { attempt: u32 },
    DeadLettered,
    Requeued,
}

#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub max_retries: u32,
    pub dependencies: Vec<String>,
    pub grace_period: Duration,
}

pub struct DeliveryConsumer<H> {
    handler: H,
    topology: Topology,
    publisher: Arc<dyn MessagePublisher>,
    reporter: Arc<dyn StatusReporter>,
    settings: ConsumerSettings,
}

impl<H: ChannelHandler> DeliveryConsumer<H> {
    pub fn new(
        handler: H,
        topology: Topology,
        publisher: Arc<dyn MessagePublisher>,
        reporter: Arc<dyn StatusReporter>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            handler,
            topology,
            publisher,
            reporter,
            settings,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn parse(&self, payload: &[u8]) -> Result<NotificationJob> {
        let job: NotificationJob = serde_json::from_slice(payload)?;

        if job.notification_type != self.handler.channel() {
            return Err(PipelineError::malformed(format!(
                "{} job delivered to the {} worker",
                job.notification_type,
                self.handler.channel()
            )));
        }
        if job.request_id.trim().is_empty() {
            return Err(PipelineError::malformed("Missing request_id"));
        }

        self.handler.validate(&job)?;
        Ok(job)
    }

    /// Processes one delivery end to end and settles it exactly once.
    pub async fn handle_delivery(
        &self,
        payload: &[u8],
        retry_count: u32,
        acker: &dyn Acknowledger,
    ) -> Result<Settlement> {
        let job = match self.parse(payload) {
            Ok(job) => job,
            Err(e) => {
                error!(error = %e, "Malformed message, dead-lettering without retry");
                acker.reject().await?;
                return Ok(Settlement::Discarded);
            }
        };

        debug!(
            request_id = %job.request_id,
            template_code = %job.template_code,
            retry_count,
            "Processing notification"
        );

        match self.handler.deliver(&job).await {
            Ok(()) => {
                acker.ack().await?;
                info!(request_id = %job.request_id, "Notification delivered");
                self.report(StatusUpdate::delivered(&job.request_id)).await;
                Ok(Settlement::Delivered)
            }
            Err(e) => self.settle_failure(&job, payload, retry_count, e, acker).await,
        }
    }

    async fn settle_failure(
        &self,
        job: &NotificationJob,
        payload: &[u8],
        retry_count: u32,
        err: PipelineError,
        acker: &dyn Acknowledger,
    ) -> Result<Settlement> {
        match classify(&err, &self.settings.dependencies) {
            FailureAction::Discard => {
                error!(request_id = %job.request_id, error = %err, "Undeliverable message, dead-lettering");
                self.report(StatusUpdate::failed(&job.request_id, err.to_string())).await;
                acker.reject().await?;
                Ok(Settlement::Discarded)
            }
            FailureAction::Terminal => {
                error!(request_id = %job.request_id, error = %err, "Terminal failure, dead-lettering");
                self.report(StatusUpdate::failed(&job.request_id, err.to_string())).await;
                acker.reject().await?;
                Ok(Settlement::DeadLettered)
            }
            FailureAction::DependencyDown => {
                warn!(
                    request_id = %job.request_id,
                    service = err.service().unwrap_or_default(),
                    error = %err,
                    "Dependency unavailable, dead-lettering without retry"
                );
                acker.reject().await?;
                Ok(Settlement::DependencyDown)
            }
            FailureAction::Retry if retry_count < self.settings.max_retries => {
                let attempt = retry_count + 1;

                warn!(
                    request_id = %job.request_id,
                    attempt,
                    delay_ms = self.topology.wait_delay_ms(attempt),
                    max_retries = self.settings.max_retries,
                    error = %err,
                    "Delivery failed, scheduling retry"
                );

                let published = self
                    .publisher
                    .publish(
                        &self.topology.wait_routing_key(attempt),
                        payload,
                        PublishOptions::retry(attempt),
                    )
                    .await;

                match published {
                    Ok(()) => {
                        acker.ack().await?;
                        Ok(Settlement::Retried { attempt })
                    }
                    Err(publish_err) => {
                        error!(
                            request_id = %job.request_id,
                            error = %publish_err,
                            "Could not schedule retry, returning message to the queue"
                        );
                        acker.requeue().await?;
                        Ok(Settlement::Requeued)
                    }
                }
            }
            FailureAction::Retry => {
                error!(
                    request_id = %job.request_id,
                    retry_count,
                    error = %err,
                    "Max retries reached, dead-lettering"
                );
                self.report(StatusUpdate::failed(&job.request_id, err.to_string())).await;
                acker.reject().await?;
                Ok(Settlement::DeadLettered)
            }
        }
    }

    async fn report(&self, update: StatusUpdate) {
        let request_id = update.request_id.clone();
        if let Err(e) = self.reporter.report(self.handler.channel(), update).await {
            error!(request_id = %request_id, error = %e, "Failed to report notification status");
        }
    }

    /// Consumes `stream` until it ends or `shutdown` fires, then waits up to
    /// the grace period for in-flight deliveries.
    pub async fn run(self: Arc<Self>, mut stream: Consumer, shutdown: CancellationToken) -> Result<()> {
        let mut in_flight = JoinSet::new();
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(queue = %self.topology.main_queue(), "Stopping message intake");
                    break;
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Delivery task panicked");
                    }
                }
                next = stream.next() => match next {
                    Some(Ok(delivery)) => {
                        let consumer = Arc::clone(&self);
                        in_flight.spawn(async move { consumer.dispatch(delivery).await });
                    }
                    Some(Err(e)) => {
                        error!(error = %e, "Consumer stream failed");
                        outcome = Err(e.into());
                        break;
                    }
                    None => {
                        warn!(queue = %self.topology.main_queue(), "Consumer stream ended");
                        break;
                    }
                }
            }
        }

        self.drain(in_flight).await;
        outcome
    }

    async fn dispatch(&self, delivery: Delivery) {
        let Delivery {
            data,
            properties,
            acker,
            ..
        } = delivery;

        let retry_count = retry_count_from(&properties);
        let acker = DeliveryAcker(acker);

        if let Err(e) = self.handle_delivery(&data, retry_count, &acker).await {
            // Unsettled deliveries are redelivered once the channel is replaced.
            error!(error = %e, "Failed to settle delivery");
        }
    }

    async fn drain(&self, mut in_flight: JoinSet<()>) {
        if in_flight.is_empty() {
            return;
        }

        info!(in_flight = in_flight.len(), "Waiting for in-flight deliveries");

        let drained = tokio::time::timeout(self.settings.grace_period, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                remaining = in_flight.len(),
                "Grace period elapsed, abandoning in-flight deliveries"
            );
            in_flight.abort_all();
        }
    }

    /// Subscribes to the main queue and keeps consuming across channel losses
    /// until `shutdown` fires.
    pub async fn supervise(
        self: Arc<Self>,
        broker: Arc<RabbitMqClient>,
        prefetch: u16,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let consumer_tag = format!("{}-worker-{}", self.handler.channel(), uuid::Uuid::new_v4());

        while !shutdown.is_cancelled() {
            match broker.consume(&self.topology, &consumer_tag, prefetch).await {
                Ok(stream) => {
                    if let Err(e) = Arc::clone(&self).run(stream, shutdown.clone()).await {
                        warn!(error = %e, "Consumer stopped, resubscribing");
                    }
                }
                Err(e) => error!(error = %e, "Failed to subscribe to queue"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(Duration::from_secs(1)) => {}
            }
        }

        info!(queue = %self.topology.main_queue(), "Consumer stopped");
        Ok(())
    }
}
