//! Resend HTTP API client.
//!
//! One `POST {api_url}/emails` per recipient, authenticated with a bearer API
//! key. Any non-2xx status is reported as a delivery failure carrying the
//! status code and the provider's response body.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use herald_common::config::AppConfig;
use herald_common::error::AppError;
use herald_common::types::{Attendee, Notification};

use crate::email::EmailMessage;
use crate::{DeliveryClient, DeliveryError};

/// Provider settings, extracted once from [`AppConfig`] at startup.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    pub api_key: String,
    pub api_url: String,
    /// Fixed sender identity for every email.
    pub from: String,
    pub timeout: Duration,
}

impl DeliveryConfig {
    pub fn from_app_config(config: &AppConfig) -> Result<Self, AppError> {
        let api_key = config
            .resend_api_key
            .clone()
            .ok_or_else(|| AppError::Config("RESEND_API_KEY is required for delivery".into()))?;
        let from = config
            .email_from
            .clone()
            .ok_or_else(|| AppError::Config("EMAIL_FROM is required for delivery".into()))?;

        Ok(Self {
            api_key,
            api_url: config.resend_api_url.trim_end_matches('/').to_string(),
            from,
            timeout: Duration::from_secs(config.delivery_timeout_secs),
        })
    }
}

/// Successful response body from `POST /emails`.
#[derive(Debug, Deserialize)]
struct SendResponse {
    id: Option<String>,
}

/// [`DeliveryClient`] backed by the Resend API.
#[derive(Debug, Clone)]
pub struct ResendClient {
    http: reqwest::Client,
    config: DeliveryConfig,
}

impl ResendClient {
    pub fn new(config: DeliveryConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| AppError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, config })
    }

    fn endpoint(&self) -> String {
        format!("{}/emails", self.config.api_url)
    }
}

#[async_trait]
impl DeliveryClient for ResendClient {
    async fn send(
        &self,
        notification: &Notification,
        attendee: &Attendee,
    ) -> Result<(), DeliveryError> {
        let email = EmailMessage::for_attendee(&self.config.from, notification, attendee);

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&email)
            .send()
            .await
            .map_err(|e| DeliveryError::Failed(format!("transport error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Failed(format!(
                "provider returned {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let provider_id = response
            .json::<SendResponse>()
            .await
            .ok()
            .and_then(|r| r.id)
            .unwrap_or_else(|| "unknown".to_string());
        tracing::debug!(
            notification_id = notification.id,
            email = %attendee.email,
            provider_id = %provider_id,
            "Email accepted by provider"
        );

        Ok(())
    }
}
