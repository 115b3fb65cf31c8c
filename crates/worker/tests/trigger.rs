//! Trigger adapter tests: payload handling and the mapping from dispatch
//! results to the invocation outcome.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use herald_common::error::AppError;
use herald_common::types::{Attendee, Notification};
use herald_engine::dispatch::DispatchEngine;
use herald_engine::store::{RecordStore, StoreConnector};
use herald_notifier::{DeliveryClient, DeliveryError};
use herald_worker::queue::{Disposition, RetryPolicy, disposition};
use herald_worker::trigger::TriggerAdapter;

// ============================================================
// Fakes
// ============================================================

#[derive(Default)]
struct MemoryConnector {
    acquired: AtomicUsize,
    completions: Arc<Mutex<Vec<(i32, String)>>>,
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn acquire(&self) -> Result<Box<dyn RecordStore>, AppError> {
        self.acquired.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStore {
            completions: Arc::clone(&self.completions),
        }))
    }
}

/// Holds notification 42 and two attendees.
struct MemoryStore {
    completions: Arc<Mutex<Vec<(i32, String)>>>,
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get_notification(&self, id: i32) -> Result<Notification, AppError> {
        if id != 42 {
            return Err(AppError::NotFound(format!("Notification {} not found", id)));
        }
        Ok(Notification {
            id,
            subject: Some("Reminder".to_string()),
            message: Some("<p>Hi</p>".to_string()),
            status: None,
            completed_date: None,
        })
    }

    async fn list_attendees(&self) -> Result<Vec<Attendee>, AppError> {
        Ok(vec![
            Attendee {
                first_name: "Ann".to_string(),
                email: "ann@x.com".to_string(),
            },
            Attendee {
                first_name: "Bo".to_string(),
                email: "bo@x.com".to_string(),
            },
        ])
    }

    async fn record_completion(
        &self,
        id: i32,
        status_summary: &str,
        _completed_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        self.completions
            .lock()
            .unwrap()
            .push((id, status_summary.to_string()));
        Ok(())
    }
}

/// Rejects every email to Ann.
struct PickyDelivery;

#[async_trait]
impl DeliveryClient for PickyDelivery {
    async fn send(
        &self,
        _notification: &Notification,
        attendee: &Attendee,
    ) -> Result<(), DeliveryError> {
        if attendee.first_name == "Ann" {
            return Err(DeliveryError::Failed("mailbox full".into()));
        }
        Ok(())
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy::new(5, Duration::from_secs(1))
}

fn adapter() -> (TriggerAdapter, Arc<MemoryConnector>) {
    let connector = Arc::new(MemoryConnector::default());
    let engine = DispatchEngine::new(connector.clone(), Arc::new(PickyDelivery));
    (TriggerAdapter::new(Arc::new(engine)), connector)
}

// ============================================================
// Tests
// ============================================================

#[tokio::test]
async fn test_malformed_payload_never_reaches_engine() {
    let (trigger, connector) = adapter();

    let result = trigger.handle(b"abc").await;

    assert!(matches!(result, Err(AppError::MalformedPayload(_))));
    assert_eq!(connector.acquired.load(Ordering::SeqCst), 0);
    assert_eq!(disposition(&result, 0, &policy()), Disposition::DeadLetter);
}

#[tokio::test]
async fn test_partial_delivery_failure_is_invocation_success() {
    let (trigger, connector) = adapter();

    let result = trigger.handle(b"42").await;

    let dispatched = result.as_ref().unwrap();
    assert_eq!(dispatched.attempted, 2);
    assert_eq!(dispatched.failed, 1);
    assert_eq!(
        connector.completions.lock().unwrap().clone(),
        vec![(42, "Notified 2 attendees (1 succeeded, 1 failed)".to_string())]
    );
    assert_eq!(disposition(&result, 0, &policy()), Disposition::Ack);
}

#[tokio::test]
async fn test_missing_notification_is_invocation_failure() {
    let (trigger, connector) = adapter();

    let result = trigger.handle(b"999").await;

    assert!(matches!(result, Err(AppError::NotFound(_))));
    assert!(connector.completions.lock().unwrap().is_empty());
    assert_eq!(
        disposition(&result, 1, &policy()),
        Disposition::Requeue {
            after: Duration::from_secs(1)
        }
    );
}
