use std::{
    collections::HashMap,
    sync::{Arc, atomic::Ordering},
};

use anyhow::Result;
use chrono::Utc;
use notification_pipeline::{
    error::{ErrorKind, PipelineError},
    models::{
        message::{NotificationJob, NotificationType},
        request::{HandleOutcome, NotificationRequest},
        status::{NotificationRecord, NotificationStatus, StatusUpdate},
    },
    orchestrator::NotificationOrchestrator,
};
use serde_json::json;

use crate::support::{MemoryStore, RecordingPublisher, StaticUsers, user};

struct Harness {
    orchestrator: NotificationOrchestrator,
    users: Arc<StaticUsers>,
    store: Arc<MemoryStore>,
    publisher: Arc<RecordingPublisher>,
}

fn harness() -> Harness {
    let users = Arc::new(StaticUsers::with(vec![
        user("user-1", true, true),
        user("user-2", false, false),
    ]));
    let store = Arc::new(MemoryStore::default());
    let publisher = Arc::new(RecordingPublisher::default());
    let orchestrator = NotificationOrchestrator::new(users.clone(), store.clone(), publisher.clone());

    Harness {
        orchestrator,
        users,
        store,
        publisher,
    }
}

fn request(request_id: &str, user_id: &str, notification_type: NotificationType) -> NotificationRequest {
    NotificationRequest {
        request_id: request_id.to_string(),
        notification_type,
        user_id: user_id.to_string(),
        template_code: "welcome".to_string(),
        variables: HashMap::from([("name".to_string(), json!("Ada"))]),
        priority: 7,
    }
}

/// Test: Opted-out users get nothing queued and no record
#[tokio::test]
async fn test_disabled_by_user() -> Result<()> {
    let h = harness();

    let outcome = h
        .orchestrator
        .handle(request("req-1", "user-2", NotificationType::Email))
        .await?;

    assert_eq!(outcome, HandleOutcome::DisabledByUser);
    assert!(h.publisher.published().is_empty());
    assert!(h.store.record("req-1").is_none());
    Ok(())
}

/// Test: A new request is recorded as pending and published with the user's details
#[tokio::test]
async fn test_new_request_is_queued() -> Result<()> {
    let h = harness();

    let outcome = h
        .orchestrator
        .handle(request("req-1", "user-1", NotificationType::Push))
        .await?;

    let HandleOutcome::Queued(record) = outcome else {
        panic!("expected queued outcome, got {:?}", outcome);
    };
    assert_eq!(record.status, NotificationStatus::Pending);
    assert_eq!(record.notification_type, Some(NotificationType::Push));
    assert_eq!(record.priority, 7);
    assert_eq!(h.store.record("req-1"), Some(record));

    let published = h.publisher.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].routing_key, "push");
    assert_eq!(published[0].options.priority, Some(7));
    assert_eq!(published[0].options.retry_count, None);

    let job: NotificationJob = serde_json::from_slice(&published[0].payload)?;
    assert_eq!(job.request_id, "req-1");
    assert_eq!(job.user_id.as_deref(), Some("user-1"));
    assert_eq!(job.email.as_deref(), Some("user-1@example.com"));
    assert_eq!(job.push_tokens.len(), 2);
    assert_eq!(job.variables["name"], "Ada");

    Ok(())
}

/// Test: A repeated request id is reported, not re-queued
#[tokio::test]
async fn test_duplicate_request_is_not_requeued() -> Result<()> {
    let h = harness();

    let first = h
        .orchestrator
        .handle(request("req-1", "user-1", NotificationType::Email))
        .await?;
    let second = h
        .orchestrator
        .handle(request("req-1", "user-1", NotificationType::Email))
        .await?;

    assert!(matches!(first, HandleOutcome::Queued(_)));
    assert!(matches!(
        second,
        HandleOutcome::AlreadyProcessed(ref record) if record.status == NotificationStatus::Pending
    ));
    assert_eq!(h.publisher.published().len(), 1);
    Ok(())
}

/// Test: Concurrent requests with one id publish exactly once
#[tokio::test]
async fn test_concurrent_duplicates_publish_once() -> Result<()> {
    let h = harness();

    let (a, b) = tokio::join!(
        h.orchestrator.handle(request("req-1", "user-1", NotificationType::Email)),
        h.orchestrator.handle(request("req-1", "user-1", NotificationType::Email)),
    );
    let outcomes = [a?, b?];

    assert_eq!(outcomes.iter().filter(|o| matches!(o, HandleOutcome::Queued(_))).count(), 1);
    assert_eq!(
        outcomes
            .iter()
            .filter(|o| matches!(o, HandleOutcome::AlreadyProcessed(_)))
            .count(),
        1
    );
    assert_eq!(h.publisher.published().len(), 1);
    Ok(())
}

/// Test: A failed record is replayed as previously failed
#[tokio::test]
async fn test_previously_failed_request() -> Result<()> {
    let h = harness();
    h.store.insert(NotificationRecord {
        request_id: "req-1".to_string(),
        status: NotificationStatus::Failed,
        notification_type: Some(NotificationType::Email),
        priority: 1,
        error: Some("smtp rejected".to_string()),
        timestamp: Utc::now(),
    });

    let outcome = h
        .orchestrator
        .handle(request("req-1", "user-1", NotificationType::Email))
        .await?;

    let HandleOutcome::PreviouslyFailed(record) = outcome else {
        panic!("expected previously failed outcome");
    };
    assert_eq!(record.error.as_deref(), Some("smtp rejected"));
    assert!(h.publisher.published().is_empty());
    Ok(())
}

/// Test: A broker failure surfaces as unavailable and keeps the pending record
#[tokio::test]
async fn test_publish_failure_keeps_pending_record() -> Result<()> {
    let h = harness();
    h.publisher.failing.store(true, Ordering::SeqCst);

    let err = h
        .orchestrator
        .handle(request("req-1", "user-1", NotificationType::Email))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceUnavailable);
    assert_eq!(err.service(), Some("message_broker"));
    assert_eq!(
        h.store.record("req-1").map(|r| r.status),
        Some(NotificationStatus::Pending)
    );

    h.publisher.failing.store(false, Ordering::SeqCst);
    let retried = h
        .orchestrator
        .handle(request("req-1", "user-1", NotificationType::Email))
        .await?;
    assert!(matches!(retried, HandleOutcome::AlreadyProcessed(_)));

    Ok(())
}

/// Test: Invalid requests fail before any lookup
#[tokio::test]
async fn test_invalid_request_skips_lookup() -> Result<()> {
    let h = harness();

    let mut invalid = request("", "user-1", NotificationType::Email);
    let err = h.orchestrator.handle(invalid.clone()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    invalid.request_id = "req-1".to_string();
    invalid.priority = 11;
    let err = h.orchestrator.handle(invalid).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    assert_eq!(h.users.lookups.load(Ordering::SeqCst), 0);
    Ok(())
}

/// Test: Unknown users and store outages propagate
#[tokio::test]
async fn test_lookup_and_store_failures_propagate() -> Result<()> {
    let h = harness();

    let err = h
        .orchestrator
        .handle(request("req-1", "ghost", NotificationType::Email))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    h.store.broken.store(true, Ordering::SeqCst);
    let err = h
        .orchestrator
        .handle(request("req-2", "user-1", NotificationType::Email))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Store(_)));
    assert!(h.publisher.published().is_empty());

    Ok(())
}

/// Test: Status reports update the existing record
#[tokio::test]
async fn test_update_status_merges_into_record() -> Result<()> {
    let h = harness();
    h.orchestrator
        .handle(request("req-1", "user-1", NotificationType::Email))
        .await?;

    let updated = h
        .orchestrator
        .update_status(NotificationType::Email, StatusUpdate::delivered("req-1"))
        .await?;

    assert_eq!(updated.status, NotificationStatus::Delivered);
    assert_eq!(updated.priority, 7, "Fields not in the update are kept");
    assert_eq!(h.orchestrator.get_status("req-1").await?, updated);

    let failed = h
        .orchestrator
        .update_status(
            NotificationType::Email,
            StatusUpdate::failed("req-1", "mailbox full".to_string()),
        )
        .await?;
    assert_eq!(failed.status, NotificationStatus::Failed);
    assert_eq!(failed.error.as_deref(), Some("mailbox full"));

    Ok(())
}

/// Test: Reports for expired records recreate them
#[tokio::test]
async fn test_update_status_recreates_missing_record() -> Result<()> {
    let h = harness();

    let record = h
        .orchestrator
        .update_status(NotificationType::Push, StatusUpdate::delivered("req-9"))
        .await?;

    assert_eq!(record.request_id, "req-9");
    assert_eq!(record.notification_type, Some(NotificationType::Push));
    assert_eq!(h.store.record("req-9"), Some(record));

    let err = h
        .orchestrator
        .update_status(NotificationType::Push, StatusUpdate::delivered(" "))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValidationError);

    Ok(())
}

/// Test: Unknown request ids are not found
#[tokio::test]
async fn test_get_status_not_found() -> Result<()> {
    let h = harness();

    let err = h.orchestrator.get_status("nope").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    Ok(())
}

/// Test: User changes invalidate cached user data
#[tokio::test]
async fn test_user_changed_invalidates_cache() -> Result<()> {
    let h = harness();

    h.orchestrator.user_changed("user-1").await;

    assert_eq!(h.users.invalidated(), vec!["user-1".to_string()]);
    Ok(())
}
