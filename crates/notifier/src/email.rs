use serde::Serialize;

use herald_common::types::{Attendee, Notification};

/// A rendered email in the shape the Resend `/emails` endpoint accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EmailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html: String,
}

impl EmailMessage {
    /// Build the email for one attendee. Subject and body are copied verbatim;
    /// a missing column becomes an empty string.
    pub fn for_attendee(from: &str, notification: &Notification, attendee: &Attendee) -> Self {
        Self {
            from: from.to_string(),
            to: vec![attendee.email.clone()],
            subject: notification.subject.clone().unwrap_or_default(),
            html: notification.message.clone().unwrap_or_default(),
        }
    }
}
