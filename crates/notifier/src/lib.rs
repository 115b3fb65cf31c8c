//! Email delivery for dispatched notifications.
//!
//! The dispatch engine talks to the provider only through [`DeliveryClient`];
//! [`ResendClient`] is the production implementation backed by the Resend
//! HTTP API.

pub mod email;
pub mod resend;

use async_trait::async_trait;
use thiserror::Error;

use herald_common::types::{Attendee, Notification};

pub use email::EmailMessage;
pub use resend::{DeliveryConfig, ResendClient};

/// Failure to deliver one email to one recipient.
///
/// Always recovered by the dispatch engine as a failed outcome, so it has no
/// counterpart in `AppError`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("delivery failed: {0}")]
    Failed(String),
}

/// Sends a single notification email to a single attendee.
///
/// Implementations report every provider-side rejection, authentication
/// failure or transport error as [`DeliveryError::Failed`]. They must not
/// panic on provider errors.
#[async_trait]
pub trait DeliveryClient: Send + Sync {
    async fn send(
        &self,
        notification: &Notification,
        attendee: &Attendee,
    ) -> Result<(), DeliveryError>;
}
