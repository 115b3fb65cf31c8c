//! Queue consumer loop: one invocation per message, settled after it returns.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::watch;

use herald_common::error::AppError;

use crate::queue::{Disposition, RedisQueue, disposition};
use crate::trigger::TriggerAdapter;

/// Seconds a blocking pop waits before re-checking for shutdown.
const POLL_TIMEOUT_SECS: f64 = 1.0;

/// Back-off after a Redis error before polling again.
const ERROR_BACKOFF: Duration = Duration::from_secs(2);

/// How often a consumer sweeps expired consumers' processing lists.
const RECOVERY_INTERVAL: Duration = Duration::from_secs(15);

pub struct Consumer {
    id: usize,
    queue: RedisQueue,
    trigger: Arc<TriggerAdapter>,
    shutdown: watch::Receiver<bool>,
}

impl Consumer {
    pub fn new(
        id: usize,
        queue: RedisQueue,
        trigger: Arc<TriggerAdapter>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            queue,
            trigger,
            shutdown,
        }
    }

    /// Consume until shutdown is signalled. A message being dispatched when
    /// the signal arrives is finished and settled first.
    pub async fn run(mut self) {
        let lease = match self.queue.register().await {
            Ok(lease) => lease,
            Err(e) => {
                tracing::error!(consumer = self.id, error = %e, "Failed to register consumer");
                return;
            }
        };

        tracing::info!(
            consumer = self.id,
            owner = %self.queue.owner(),
            queue = %self.queue.name(),
            "Consumer started"
        );

        let mut last_recovery: Option<Instant> = None;
        while !*self.shutdown.borrow() {
            if last_recovery.is_none_or(|at| at.elapsed() >= RECOVERY_INTERVAL) {
                self.recover().await;
                last_recovery = Some(Instant::now());
            }

            let payload = match self.poll().await {
                Ok(Some(payload)) => payload,
                Ok(None) => continue,
                Err(e) => {
                    tracing::error!(consumer = self.id, error = %e, "Failed to read from queue");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                    continue;
                }
            };

            if let Err(e) = self.process(&payload).await {
                tracing::error!(
                    consumer = self.id,
                    payload = %String::from_utf8_lossy(&payload),
                    error = %e,
                    "Failed to settle message, leaving it for recovery"
                );
            }
        }

        if let Err(e) = self.queue.release(lease).await {
            tracing::warn!(consumer = self.id, error = %e, "Failed to release consumer lease");
        }
        tracing::info!(consumer = self.id, "Consumer stopped");
    }

    /// Run one taken message through the trigger and settle it.
    ///
    /// `Err` means the message could not be settled and is still in this
    /// consumer's processing list; the next recovery pass requeues it.
    pub async fn process(&mut self, payload: &[u8]) -> Result<Disposition, AppError> {
        let result = self.trigger.handle(payload).await;

        let failures = match &result {
            Err(e) if e.is_retryable() => self.queue.record_failure(payload).await?,
            _ => 0,
        };

        let action = disposition(&result, failures, &self.queue.policy());
        let message = String::from_utf8_lossy(payload);
        match action {
            Disposition::Ack => {}
            Disposition::Requeue { after } => tracing::warn!(
                consumer = self.id,
                payload = %message,
                failures,
                retry_in_ms = after.as_millis() as u64,
                "Message requeued for redelivery"
            ),
            Disposition::DeadLetter => tracing::error!(
                consumer = self.id,
                payload = %message,
                failures,
                "Message dead-lettered"
            ),
        }

        self.queue.settle(payload, action).await?;
        Ok(action)
    }

    async fn poll(&mut self) -> Result<Option<Vec<u8>>, AppError> {
        self.queue.promote_due().await?;
        self.queue.next(POLL_TIMEOUT_SECS).await
    }

    async fn recover(&mut self) {
        match self.queue.recover_orphans().await {
            Ok(0) => {}
            Ok(recovered) => {
                tracing::warn!(consumer = self.id, recovered, "Requeued unsettled messages")
            }
            Err(e) => tracing::error!(consumer = self.id, error = %e, "Orphan recovery failed"),
        }
    }
}
