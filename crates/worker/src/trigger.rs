//! Trigger adapter: the boundary between a raw queue message and a dispatch pass.

use std::sync::Arc;

use herald_common::error::AppError;
use herald_common::types::DispatchResult;
use herald_engine::dispatch::DispatchEngine;

/// Parses queue payloads and runs the dispatch engine on them.
pub struct TriggerAdapter {
    engine: Arc<DispatchEngine>,
}

impl TriggerAdapter {
    pub fn new(engine: Arc<DispatchEngine>) -> Self {
        Self { engine }
    }

    /// Handle one queue message.
    ///
    /// `Ok` means the message can be acknowledged, even if some recipients
    /// could not be reached. `Err` is an invocation failure: the platform
    /// decides whether to redeliver based on [`AppError::is_retryable`].
    pub async fn handle(&self, payload: &[u8]) -> Result<DispatchResult, AppError> {
        let notification_id = parse_payload(payload).inspect_err(|e| {
            tracing::error!(error = %e, "Rejected queue message");
        })?;

        tracing::info!(notification_id, "Queue trigger processed message");

        match self.engine.dispatch(notification_id).await {
            Ok(result) => {
                if result.is_partial() {
                    tracing::warn!(
                        notification_id,
                        failed = result.failed,
                        attempted = result.attempted,
                        "Dispatch completed with failed deliveries"
                    );
                }
                Ok(result)
            }
            Err(e) => {
                tracing::error!(notification_id, error = %e, "Dispatch aborted");
                Err(e)
            }
        }
    }
}

/// Decode a payload whose body is the decimal notification id.
pub fn parse_payload(payload: &[u8]) -> Result<i32, AppError> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| AppError::MalformedPayload("payload is not valid UTF-8".to_string()))?;

    let text = text.trim();
    text.parse::<i32>().map_err(|e| {
        AppError::MalformedPayload(format!("'{}' is not a notification id: {}", text, e))
    })
}
