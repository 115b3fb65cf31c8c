use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored notification to broadcast to every attendee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Notification {
    pub id: i32,
    pub subject: Option<String>,
    /// HTML body, sent verbatim.
    pub message: Option<String>,
    pub status: Option<String>,
    pub completed_date: Option<DateTime<Utc>>,
}

/// A conference attendee, the delivery target of a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Attendee {
    pub first_name: String,
    pub email: String,
}

/// Result of one delivery attempt to one attendee.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryOutcome {
    pub attendee: Attendee,
    pub succeeded: bool,
    pub error: Option<String>,
}

impl DeliveryOutcome {
    pub fn sent(attendee: Attendee) -> Self {
        Self {
            attendee,
            succeeded: true,
            error: None,
        }
    }

    pub fn failed(attendee: Attendee, reason: impl Into<String>) -> Self {
        Self {
            attendee,
            succeeded: false,
            error: Some(reason.into()),
        }
    }
}

/// Aggregate over every delivery attempt of one dispatch pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchResult {
    /// Correlates the log lines of a single pass.
    pub dispatch_id: Uuid,
    pub notification_id: i32,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// The summary persisted into `notification.status`.
    pub status_summary: String,
    pub completed_at: DateTime<Utc>,
    /// Outcomes in attendee-list order.
    pub outcomes: Vec<DeliveryOutcome>,
}

impl DispatchResult {
    /// Tally outcomes and render the status summary.
    pub fn from_outcomes(
        dispatch_id: Uuid,
        notification_id: i32,
        outcomes: Vec<DeliveryOutcome>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let attempted = outcomes.len();
        let succeeded = outcomes.iter().filter(|o| o.succeeded).count();
        let failed = attempted - succeeded;

        Self {
            dispatch_id,
            notification_id,
            attempted,
            succeeded,
            failed,
            status_summary: status_summary(attempted, succeeded, failed),
            completed_at,
            outcomes,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.failed > 0
    }
}

/// Render the value stored in `notification.status`.
///
/// `attempted` is the number of attendees loaded for the pass, which is also
/// the number addressed; the split shows how many the provider accepted.
pub fn status_summary(attempted: usize, succeeded: usize, failed: usize) -> String {
    format!("Notified {attempted} attendees ({succeeded} succeeded, {failed} failed)")
}
