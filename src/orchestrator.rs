//! Gateway-side entry point: preference check, idempotent record of intent,
//! then hand-off to the broker.

use std::sync::Arc;

use tracing::{debug, error, info};

use crate::{
    clients::{
        rbmq::{MessagePublisher, PublishOptions},
        redis::StatusStore,
        users::UserDirectory,
    },
    error::{PipelineError, Result},
    models::{
        message::{NotificationJob, NotificationType},
        request::{HandleOutcome, NotificationRequest},
        status::{NotificationRecord, NotificationStatus, StatusUpdate},
    },
};

pub struct NotificationOrchestrator {
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn StatusStore>,
    publisher: Arc<dyn MessagePublisher>,
}

impl NotificationOrchestrator {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        store: Arc<dyn StatusStore>,
        publisher: Arc<dyn MessagePublisher>,
    ) -> Self {
        Self {
            users,
            store,
            publisher,
        }
    }

    /// Queues a notification at most once per live request id.
    ///
    /// The PENDING record is written before publishing and is left in place
    /// if the publish fails; it expires with its TTL.
    pub async fn handle(&self, request: NotificationRequest) -> Result<HandleOutcome> {
        request.validate()?;

        let notification_type = request.notification_type;
        let user = self.users.get_user(&request.user_id).await?;

        if !user.accepts(notification_type) {
            info!(
                request_id = %request.request_id,
                user_id = %request.user_id,
                notification_type = %notification_type,
                "Notification disabled by user preference"
            );
            return Ok(HandleOutcome::DisabledByUser);
        }

        if let Some(existing) = self.store.get(&request.request_id).await? {
            return Ok(Self::replay(existing));
        }

        let pending = NotificationRecord::pending(&request.request_id, notification_type, request.priority);
        if let Some(existing) = self.store.create(&pending).await? {
            debug!(request_id = %request.request_id, "Lost idempotency race to a concurrent request");
            return Ok(Self::replay(existing));
        }

        let job = NotificationJob {
            notification_type,
            request_id: request.request_id.clone(),
            user_id: Some(user.id),
            template_code: request.template_code,
            variables: request.variables,
            priority: request.priority,
            email: user.email,
            push_tokens: user.push_tokens,
        };

        let payload = serde_json::to_vec(&job)
            .map_err(|e| PipelineError::Internal(format!("Failed to encode job: {}", e)))?;

        self.publisher
            .publish(
                notification_type.routing_key(),
                &payload,
                PublishOptions::with_priority(request.priority),
            )
            .await
            .map_err(|e| {
                error!(request_id = %request.request_id, error = %e, "Failed to publish notification");
                PipelineError::unavailable("message_broker", "Failed to queue notification.")
            })?;

        info!(
            request_id = %request.request_id,
            notification_type = %notification_type,
            priority = request.priority,
            "Notification queued"
        );

        Ok(HandleOutcome::Queued(pending))
    }

    fn replay(existing: NotificationRecord) -> HandleOutcome {
        debug!(request_id = %existing.request_id, status = %existing.status, "Duplicate request id");

        match existing.status {
            NotificationStatus::Failed => HandleOutcome::PreviouslyFailed(existing),
            NotificationStatus::Pending | NotificationStatus::Delivered => {
                HandleOutcome::AlreadyProcessed(existing)
            }
        }
    }

    /// Folds a worker's report into the stored record, recreating it if it
    /// already expired, and restarts its TTL.
    pub async fn update_status(
        &self,
        channel: NotificationType,
        update: StatusUpdate,
    ) -> Result<NotificationRecord> {
        if update.request_id.trim().is_empty() {
            return Err(PipelineError::validation("request_id is required."));
        }

        let record = match self.store.get(&update.request_id).await? {
            Some(existing) => existing.apply(&update),
            None => NotificationRecord {
                request_id: update.request_id.clone(),
                status: update.status,
                notification_type: Some(channel),
                priority: 0,
                error: None,
                timestamp: chrono::Utc::now(),
            }
            .apply(&update),
        };

        self.store.put(&record).await?;

        info!(
            request_id = %record.request_id,
            channel = %channel,
            status = %record.status,
            "Notification status updated"
        );

        Ok(record)
    }

    pub async fn get_status(&self, request_id: &str) -> Result<NotificationRecord> {
        self.store
            .get(request_id)
            .await?
            .ok_or_else(|| PipelineError::not_found("Notification"))
    }

    /// Drops cached user data after the user changed.
    pub async fn user_changed(&self, user_id: &str) {
        self.users.invalidate(user_id).await;
    }
}
