//! Dispatch engine: fans one notification out to every attendee.
//!
//! A pass:
//! 1. Loads the notification (fatal on failure)
//! 2. Loads all attendees (fatal on failure)
//! 3. Sends one email per attendee with bounded parallelism; a failed send is
//!    recorded as an outcome and never stops the others
//! 4. Writes the status summary and completion time exactly once, after every
//!    send has returned

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use herald_common::error::AppError;
use herald_common::types::{Attendee, DeliveryOutcome, DispatchResult, Notification};
use herald_notifier::{DeliveryClient, DeliveryError};

use crate::store::StoreConnector;

/// Default number of sends in flight within one pass.
pub const DEFAULT_CONCURRENCY: usize = 8;

/// Orchestrates a dispatch pass. Holds no per-pass state, so one engine can
/// serve any number of concurrent invocations.
pub struct DispatchEngine {
    store: Arc<dyn StoreConnector>,
    delivery: Arc<dyn DeliveryClient>,
    concurrency: usize,
}

impl DispatchEngine {
    pub fn new(store: Arc<dyn StoreConnector>, delivery: Arc<dyn DeliveryClient>) -> Self {
        Self {
            store,
            delivery,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Bound the fan-out. `1` sends sequentially.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run one dispatch pass for `notification_id`.
    ///
    /// Returns `Ok` whenever the completion write happened, including when
    /// some or all individual sends failed. Errors are fatal to the pass and
    /// leave the notification untouched, except a failed completion write,
    /// which happens after the emails went out.
    pub async fn dispatch(&self, notification_id: i32) -> Result<DispatchResult, AppError> {
        let dispatch_id = Uuid::new_v4();

        // Dropped on every return path, which releases the connection.
        let store = self.store.acquire().await?;

        let notification = store.get_notification(notification_id).await?;
        let attendees = store.list_attendees().await?;

        tracing::info!(
            dispatch_id = %dispatch_id,
            notification_id,
            attendees = attendees.len(),
            concurrency = self.concurrency,
            "Dispatching notification"
        );

        let outcomes = self.fan_out(Arc::new(notification), attendees).await;

        for outcome in outcomes.iter().filter(|o| !o.succeeded) {
            tracing::warn!(
                dispatch_id = %dispatch_id,
                notification_id,
                email = %outcome.attendee.email,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Delivery failed"
            );
        }

        let result =
            DispatchResult::from_outcomes(dispatch_id, notification_id, outcomes, Utc::now());

        store
            .record_completion(notification_id, &result.status_summary, result.completed_at)
            .await?;

        tracing::info!(
            dispatch_id = %dispatch_id,
            notification_id,
            attempted = result.attempted,
            succeeded = result.succeeded,
            failed = result.failed,
            "Notification dispatched"
        );

        Ok(result)
    }

    /// Send to every attendee and collect outcomes in attendee-list order.
    ///
    /// Returns only once every send task has finished. Dropping the future
    /// aborts the tasks still in flight.
    async fn fan_out(
        &self,
        notification: Arc<Notification>,
        attendees: Vec<Attendee>,
    ) -> Vec<DeliveryOutcome> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks = JoinSet::new();

        for (index, attendee) in attendees.iter().cloned().enumerate() {
            let permits = Arc::clone(&permits);
            let delivery = Arc::clone(&self.delivery);
            let notification = Arc::clone(&notification);

            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await.ok();
                let result = delivery.send(&notification, &attendee).await;
                (index, result)
            });
        }

        let mut results: Vec<Option<Result<(), DeliveryError>>> = vec![None; attendees.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(e) => tracing::error!(error = %e, "Delivery task did not complete"),
            }
        }

        attendees
            .into_iter()
            .zip(results)
            .map(|(attendee, result)| match result {
                Some(Ok(())) => DeliveryOutcome::sent(attendee),
                Some(Err(DeliveryError::Failed(reason))) => {
                    DeliveryOutcome::failed(attendee, reason)
                }
                None => DeliveryOutcome::failed(attendee, "delivery task panicked"),
            })
            .collect()
    }
}
