//! Outbound open confirmations.
//!
//! When a tracked notification is opened for the first time, the originating
//! system is told about it with a single JSON POST to the callback URL carried
//! on the record. Failures are reported to the caller and never retried.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use herald_common::types::NotificationRecord;

/// Body POSTed to the originator's callback URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenConfirmation {
    pub source_notification_id: String,
    pub recipient_identity: String,
    pub recipient_display_name: Option<String>,
    pub opened_at: DateTime<Utc>,
}

impl OpenConfirmation {
    /// Build the confirmation for a record that has just been opened.
    ///
    /// Returns `None` if the record carries no `opened_at`.
    pub fn for_record(record: &NotificationRecord) -> Option<Self> {
        Some(Self {
            source_notification_id: record.source_notification_id.clone(),
            recipient_identity: record.recipient_identity.clone(),
            recipient_display_name: record.recipient_display_name().map(str::to_string),
            opened_at: record.opened_at?,
        })
    }
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Callback request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Callback returned HTTP {status}")]
    Status { status: u16 },

    #[error("Callback client error: {0}")]
    Client(String),
}

/// Something that can deliver an [`OpenConfirmation`].
#[async_trait]
pub trait ConfirmationSender: Send + Sync {
    async fn send(&self, url: &str, confirmation: &OpenConfirmation) -> Result<(), CallbackError>;
}

/// `reqwest`-backed confirmation sender with a bounded per-request timeout.
#[derive(Clone)]
pub struct HttpConfirmationSender {
    client: Client,
}

impl HttpConfirmationSender {
    pub fn new(timeout: Duration) -> Result<Self, CallbackError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("herald/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CallbackError::Client(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl ConfirmationSender for HttpConfirmationSender {
    async fn send(&self, url: &str, confirmation: &OpenConfirmation) -> Result<(), CallbackError> {
        let response = self.client.post(url).json(confirmation).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(CallbackError::Status {
                status: status.as_u16(),
            });
        }

        tracing::debug!(
            url,
            source_notification_id = %confirmation.source_notification_id,
            "Open confirmation accepted"
        );
        Ok(())
    }
}
